// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::domain::models::batch::Batch;
use crate::domain::models::task::{DocumentId, WorkflowType};

/// 轮询订阅
///
/// 每个 generation_id 最多一条，等待远端完成期间存在。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollQueueEntry {
    pub generation_id: String,
    pub task_id: String,
    pub batch_id: String,
    pub workflow_type: WorkflowType,
    pub document_ids: Vec<DocumentId>,
    /// 数值越小越紧急
    pub priority: i32,
    /// 连续失败的轮询次数
    pub attempt_count: u32,
    pub next_poll_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl PollQueueEntry {
    /// 为一个已被远端接受的批次创建订阅
    ///
    /// # 参数
    ///
    /// * `generation_id` - 远端生成ID
    /// * `batch` - 所属批次
    /// * `workflow_type` - 工作流类型
    /// * `priority` - 优先级
    /// * `now` - 入队时间
    /// * `first_poll_at` - 首次轮询时间
    pub fn for_batch(
        generation_id: &str,
        batch: &Batch,
        workflow_type: WorkflowType,
        priority: i32,
        now: DateTime<Utc>,
        first_poll_at: DateTime<Utc>,
    ) -> Self {
        Self {
            generation_id: generation_id.to_string(),
            task_id: batch.task_id.clone(),
            batch_id: batch.batch_id.clone(),
            workflow_type,
            document_ids: batch.document_ids.clone(),
            priority,
            attempt_count: 0,
            next_poll_at: first_poll_at,
            enqueued_at: now,
            last_error: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_poll_at <= now
    }

    /// 与新的入队请求合并：更紧急的优先级胜出，尝试次数保留
    pub fn merge_priority(&mut self, priority: i32) -> bool {
        if priority < self.priority {
            self.priority = priority;
            true
        } else {
            false
        }
    }

    /// 调度顺序：优先级 → 尝试次数 → 入队时间
    pub fn schedule_order(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.attempt_count.cmp(&other.attempt_count))
            .then(self.enqueued_at.cmp(&other.enqueued_at))
            .then_with(|| self.generation_id.cmp(&other.generation_id))
    }
}
