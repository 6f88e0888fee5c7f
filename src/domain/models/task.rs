// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::batch::{Batch, BatchStatus};

/// 文档标识符
pub type DocumentId = u64;

/// 生成任务实体
///
/// 一次用户发起的内容生成请求，覆盖一个或多个文档。
/// 文档被切分为若干批次（Batch）分别派发给远端生成服务，
/// 任务的计数与状态由所有批次汇总得出。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// 任务唯一标识符
    pub id: String,
    /// 工作流类型
    pub workflow_type: WorkflowType,
    /// 单个或批量
    pub action: TaskAction,
    /// 任务状态
    pub status: TaskStatus,
    /// 优先级，数值越小越紧急
    pub priority: i32,
    /// 文档总数
    pub total_posts: u32,
    /// 文档ID列表
    pub document_ids: Vec<DocumentId>,
    /// 批次ID列表，任务离开 pending 后不再变化
    pub batch_ids: Vec<String>,
    /// 透传给远端服务的工作流参数
    #[serde(default)]
    pub workflow_options: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// 首次派发尝试时间
    pub scheduled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 最近一次批次进展时间，用于卡住检测
    pub last_progress_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub processed_count: u32,
    pub failed_count: u32,
    pub total_batches: u32,
    pub completed_batches: u32,
    pub failed_batches: u32,
    /// 失败原因，供运维查看
    pub failure_reason: Option<String>,
}

/// 工作流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    #[default]
    Quiz,
    Summary,
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WorkflowType::Quiz => write!(f, "quiz"),
            WorkflowType::Summary => write!(f, "summary"),
        }
    }
}

impl FromStr for WorkflowType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "quiz" => Ok(WorkflowType::Quiz),
            "summary" => Ok(WorkflowType::Summary),
            other => Err(DomainError::ValidationError(format!(
                "unknown workflow type: {}",
                other
            ))),
        }
    }
}

/// 任务动作：单文档或批量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    #[default]
    Single,
    Bulk,
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TaskAction::Single => write!(f, "single"),
            TaskAction::Bulk => write!(f, "bulk"),
        }
    }
}

/// 任务状态枚举
///
/// 状态只能向前推进：
/// Pending → Scheduled → Processing → Completed/CompletedWithErrors/Failed/Cancelled
/// 唯一的回退是运维重试：Failed/Cancelled → Pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Scheduled,
    Processing,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// 所有状态，按生命周期顺序
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Pending,
        TaskStatus::Scheduled,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::CompletedWithErrors,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// 仍需后台推进的状态
    pub const ACTIVE: [TaskStatus; 3] = [
        TaskStatus::Pending,
        TaskStatus::Scheduled,
        TaskStatus::Processing,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::CompletedWithErrors
                | TaskStatus::Failed
                | TaskStatus::Cancelled
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Scheduled => 1,
            TaskStatus::Processing => 2,
            _ => 3,
        }
    }

    /// 判断状态转换是否合法
    ///
    /// 相同状态视为合法（processing 自环），终态之间互不转换
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if *self == next {
            return true;
        }
        if next == TaskStatus::Pending {
            return self.is_retryable();
        }
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::CompletedWithErrors => "completed_with_errors",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.to_string() == s)
            .ok_or_else(|| DomainError::ValidationError(format!("unknown task status: {}", s)))
    }
}

/// 领域错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 无效的状态转换
    #[error("cannot move task from {from} to {to}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus },

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl Task {
    /// 创建一个新的待处理任务
    ///
    /// # 参数
    ///
    /// * `workflow_type` - 工作流类型
    /// * `document_ids` - 文档ID列表（调用方已去重）
    /// * `priority` - 优先级
    /// * `now` - 创建时间
    pub fn new(
        workflow_type: WorkflowType,
        document_ids: Vec<DocumentId>,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Self {
        let action = if document_ids.len() > 1 {
            TaskAction::Bulk
        } else {
            TaskAction::Single
        };

        Self {
            id: format!("task_{}", Uuid::new_v4().simple()),
            workflow_type,
            action,
            status: TaskStatus::Pending,
            priority,
            total_posts: document_ids.len() as u32,
            document_ids,
            batch_ids: Vec::new(),
            workflow_options: serde_json::Value::Null,
            created_at: now,
            scheduled_at: None,
            completed_at: None,
            last_progress_at: None,
            updated_at: now,
            processed_count: 0,
            failed_count: 0,
            total_batches: 0,
            completed_batches: 0,
            failed_batches: 0,
            failure_reason: None,
        }
    }

    /// 标记首次派发尝试：pending → scheduled
    pub fn mark_scheduled(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Pending {
            return false;
        }
        self.status = TaskStatus::Scheduled;
        if self.scheduled_at.is_none() {
            self.scheduled_at = Some(now);
        }
        self.updated_at = now;
        true
    }

    /// 以失败终止任务并记录原因；终态任务保持不变
    pub fn fail_with(&mut self, reason: &str, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.failure_reason = Some(reason.to_string());
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// 取消任务；终态任务保持不变
    pub fn cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
        self.updated_at = now;
        true
    }

    /// 运维重试：failed/cancelled → pending
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.status.is_retryable() {
            return Err(DomainError::InvalidStateTransition {
                from: self.status,
                to: TaskStatus::Pending,
            });
        }
        self.status = TaskStatus::Pending;
        self.failure_reason = None;
        self.completed_at = None;
        self.scheduled_at = None;
        self.last_progress_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// 根据全部批次重新汇总计数并推导状态
    ///
    /// 计数总是对所有批次求和，不依赖批次完成顺序。
    /// 终态任务只刷新计数，不改变状态。
    ///
    /// # 返回值
    ///
    /// 任务是否有变化
    pub fn apply_batch_summary(&mut self, batches: &[Batch], now: DateTime<Utc>) -> bool {
        let before = self.clone();
        self.recount(batches);

        if !self.status.is_terminal() {
            let all_terminal = self.total_batches > 0
                && batches.len() as u32 == self.total_batches
                && batches.iter().all(|b| b.status.is_terminal());

            let next = if all_terminal {
                if self.failed_batches == 0 {
                    TaskStatus::Completed
                } else if self.failed_batches == self.total_batches {
                    TaskStatus::Failed
                } else {
                    TaskStatus::CompletedWithErrors
                }
            } else if batches
                .iter()
                .any(|b| b.status != BatchStatus::Pending || b.success_count + b.fail_count > 0)
            {
                TaskStatus::Processing
            } else {
                self.status
            };

            if next != self.status && self.status.can_transition_to(next) {
                self.status = next;
                if next.is_terminal() {
                    self.completed_at = Some(now);
                }
                if next == TaskStatus::Failed && self.failure_reason.is_none() {
                    self.failure_reason = Some("all batches failed".to_string());
                }
            }
        }

        if self.processed_count + self.failed_count
            > before.processed_count + before.failed_count
            || self.completed_batches + self.failed_batches
                > before.completed_batches + before.failed_batches
        {
            self.last_progress_at = Some(now);
        }

        let changed = *self != before;
        if changed {
            self.updated_at = now;
        }
        changed
    }

    /// 仅按批次重新汇总计数，不改变状态
    pub fn recount(&mut self, batches: &[Batch]) {
        let processed: u32 = batches.iter().map(|b| b.success_count).sum();
        let failed: u32 = batches.iter().map(|b| b.fail_count).sum();
        self.processed_count = processed.min(self.total_posts);
        self.failed_count = failed.min(self.total_posts - self.processed_count);

        self.total_batches = self.batch_ids.len().max(batches.len()) as u32;
        self.completed_batches = batches
            .iter()
            .filter(|b| b.status == BatchStatus::Completed)
            .count() as u32;
        self.failed_batches = batches
            .iter()
            .filter(|b| b.status == BatchStatus::Failed)
            .count() as u32;
    }

    /// 进度百分比（仅供展示，不参与状态推导）
    pub fn progress(&self) -> u8 {
        let ratio = if !self.status.is_terminal() && self.total_batches > 0 {
            (self.completed_batches + self.failed_batches) as f64 / self.total_batches as f64
        } else if self.total_posts > 0 {
            self.processed_count as f64 / self.total_posts as f64
        } else {
            0.0
        };
        (ratio * 100.0).round().clamp(0.0, 100.0) as u8
    }
}
