// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::domain::models::task::{Task, TaskStatus, WorkflowType};

/// 任务索引条目
///
/// 列表排序与过滤所需的最少字段，避免加载完整任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskIndexEntry {
    pub task_id: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub workflow_type: WorkflowType,
    /// 对应任务记录的更新时间，较旧的写入不会覆盖较新的条目
    pub updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskIndexEntry {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            status: task.status,
            created_at: task.created_at,
            workflow_type: task.workflow_type,
            updated_at: task.updated_at,
        }
    }
}

/// 任务列表过滤条件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub workflow_type: Option<WorkflowType>,
}

impl TaskFilter {
    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn matches(&self, status: TaskStatus, workflow_type: WorkflowType) -> bool {
        self.status.is_none_or(|s| s == status)
            && self.workflow_type.is_none_or(|w| w == workflow_type)
    }
}

/// 分页参数，page 从 1 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    /// 规范化分页参数
    pub fn new(page: u32, per_page: u32, max_per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, max_per_page.max(1)),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.per_page as usize
    }

    pub fn total_pages(&self, total: usize) -> u32 {
        total.div_ceil(self.per_page as usize) as u32
    }
}

/// 分页结果
#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    /// 过滤后的总数
    pub total: usize,
    pub page: u32,
    pub total_pages: u32,
    pub per_page: u32,
    /// 是否由索引提供（否则为回退扫描）
    pub from_index: bool,
}

/// 列表排序：最新创建的在前，ID 作为稳定的次级排序
pub fn newest_first(a: (&DateTime<Utc>, &str), b: (&DateTime<Utc>, &str)) -> Ordering {
    b.0.cmp(a.0).then_with(|| a.1.cmp(b.1))
}

/// 对完整任务列表执行过滤、排序与分页
///
/// 用于索引不可用时的回退路径
pub fn paginate_tasks(mut tasks: Vec<Task>, filter: &TaskFilter, page: PageRequest) -> TaskPage {
    tasks.retain(|t| filter.matches(t.status, t.workflow_type));
    tasks.sort_by(|a, b| newest_first((&a.created_at, &a.id), (&b.created_at, &b.id)));

    let total = tasks.len();
    let tasks = tasks
        .into_iter()
        .skip(page.offset())
        .take(page.per_page as usize)
        .collect();

    TaskPage {
        tasks,
        total,
        page: page.page,
        total_pages: page.total_pages(total),
        per_page: page.per_page,
        from_index: false,
    }
}
