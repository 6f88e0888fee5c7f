// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::domain::models::generation::GenerationUpdate;
use crate::domain::models::task::DocumentId;

/// 批次状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Pending,
    Dispatched,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Dispatched => "dispatched",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// 批次实体
///
/// 任务文档的一个有界切片，作为一次远端调用派发。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub batch_id: String,
    /// 所属任务（非拥有引用）
    pub task_id: String,
    /// 在任务中的创建顺序
    pub index: usize,
    pub document_ids: Vec<DocumentId>,
    pub status: BatchStatus,
    pub success_count: u32,
    pub fail_count: u32,
    /// 远端分配的生成ID
    pub generation_id: Option<String>,
    pub dispatch_attempts: u32,
    /// 下一次允许派发的时间（退避）
    pub next_dispatch_at: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// 每个文档的生成结果
    #[serde(default)]
    pub results: BTreeMap<DocumentId, serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// 批次ID由任务ID与序号确定，保证重复切分得到相同结果
    pub fn id_for(task_id: &str, index: usize) -> String {
        format!("{}-b{}", task_id, index)
    }

    pub fn new(
        task_id: &str,
        index: usize,
        document_ids: Vec<DocumentId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_id: Self::id_for(task_id, index),
            task_id: task_id.to_string(),
            index,
            document_ids,
            status: BatchStatus::Pending,
            success_count: 0,
            fail_count: 0,
            generation_id: None,
            dispatch_attempts: 0,
            next_dispatch_at: None,
            dispatched_at: None,
            completed_at: None,
            last_error: None,
            results: BTreeMap::new(),
            updated_at: now,
        }
    }

    /// 是否到达可派发时间
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == BatchStatus::Pending && self.next_dispatch_at.is_none_or(|at| at <= now)
    }

    /// 合并远端更新
    ///
    /// 远端计数是累计值，取较大者后按文档数截断，因此重复应用同一更新是幂等的。
    /// 只有远端明确标记终态时才会将批次置为 completed/failed。
    ///
    /// # 返回值
    ///
    /// 批次是否有变化
    pub fn merge_update(&mut self, update: &GenerationUpdate, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let before = self.clone();
        let size = self.document_ids.len() as u32;

        self.success_count = self.success_count.max(update.success_count).min(size);
        self.fail_count = self
            .fail_count
            .max(update.fail_count)
            .min(size - self.success_count);

        for (doc, result) in &update.results {
            self.results.insert(*doc, result.clone());
        }

        if update.is_terminal {
            self.status = if self.success_count == 0 && self.fail_count > 0 {
                BatchStatus::Failed
            } else {
                BatchStatus::Completed
            };
            self.completed_at = Some(now);
            self.next_dispatch_at = None;
        } else if self.status == BatchStatus::Pending {
            self.status = BatchStatus::Dispatched;
        }

        let changed = *self != before;
        if changed {
            self.updated_at = now;
        }
        changed
    }

    /// 标记失败（派发重试耗尽、远端拒绝或轮询耗尽）
    pub fn fail_with(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = BatchStatus::Failed;
        self.last_error = Some(reason.to_string());
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = BatchStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// 重置为待派发，用于运维重试与卡住恢复
    pub fn reset_to_pending(&mut self, clear_progress: bool, now: DateTime<Utc>) {
        self.status = BatchStatus::Pending;
        self.generation_id = None;
        self.next_dispatch_at = None;
        self.dispatched_at = None;
        self.completed_at = None;
        if clear_progress {
            self.success_count = 0;
            self.fail_count = 0;
            self.results.clear();
            self.dispatch_attempts = 0;
            self.last_error = None;
        }
        self.updated_at = now;
    }
}
