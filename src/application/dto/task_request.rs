// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::models::batch::Batch;
use crate::domain::models::poll_entry::PollQueueEntry;
use crate::domain::models::task::{DocumentId, Task, TaskStatus, WorkflowType};
use crate::queue::polling_queue::PollResult;

/// 提交任务请求DTO
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SubmitTaskRequest {
    /// 工作流类型
    pub workflow_type: WorkflowType,

    /// 文档ID列表，重复项会被去除
    #[validate(length(min = 1, message = "document_ids cannot be empty"))]
    pub document_ids: Vec<DocumentId>,

    /// 优先级，数值越小越紧急
    #[validate(range(min = 0, max = 100))]
    pub priority: Option<i32>,

    /// 透传给远端服务的工作流参数
    pub options: Option<serde_json::Value>,
}

/// 任务列表查询参数
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct ListTasksQuery {
    #[validate(range(min = 1))]
    pub page: Option<u32>,

    #[validate(range(min = 1, max = 1000))]
    pub per_page: Option<u32>,

    pub status: Option<TaskStatus>,

    pub workflow_type: Option<WorkflowType>,
}

/// 任务概要
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    #[serde(flatten)]
    pub task: Task,
    pub progress: u8,
}

impl From<Task> for TaskSummary {
    fn from(task: Task) -> Self {
        Self {
            progress: task.progress(),
            task,
        }
    }
}

/// 任务详情：任务、批次与轮询订阅
#[derive(Debug, Clone, Serialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub summary: TaskSummary,
    pub batches: Vec<Batch>,
    pub poll_entries: Vec<PollQueueEntry>,
}

/// 分页列表响应
#[derive(Debug, Clone, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<TaskSummary>,
    pub total: usize,
    pub page: u32,
    pub total_pages: u32,
    pub per_page: u32,
    pub from_index: bool,
}

/// RunNow 结果
#[derive(Debug, Clone, Serialize)]
pub struct RunNowReport {
    pub task: TaskSummary,
    /// 冷却期内，未做任何工作
    pub cooled_down: bool,
    pub dispatched: usize,
    pub circuit_open: bool,
    pub polls: Vec<PollResult>,
    pub errors: Vec<String>,
}
