// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::models::batch::Batch;
use crate::domain::models::task::{DomainError, Task};
use crate::domain::repositories::record_store::StoreError;

/// 仓库错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// 存储错误
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    /// 记录未找到
    #[error("Record not found: {0}")]
    NotFound(String),
    /// 领域规则拒绝了本次修改
    #[error("{0}")]
    Rejected(#[from] DomainError),
}

/// 任务变更闭包，返回是否需要写入
pub type TaskMutation<'a> = &'a (dyn Fn(&mut Task) -> Result<bool, DomainError> + Send + Sync);

/// 批次变更闭包，返回是否需要写入
pub type BatchMutation<'a> = &'a (dyn Fn(&mut Batch) -> Result<bool, DomainError> + Send + Sync);

/// 任务仓库特质
///
/// 定义任务记录访问接口
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建新任务，ID 已存在时返回 false
    async fn create(&self, task: &Task) -> Result<bool, RepositoryError>;
    /// 根据ID查找任务
    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, RepositoryError>;
    /// 乐观更新任务，任务不存在时返回 None
    async fn update(&self, id: &str, mutate: TaskMutation<'_>)
        -> Result<Option<Task>, RepositoryError>;
    /// 检查任务是否存在（未过期）
    async fn exists(&self, id: &str) -> Result<bool, RepositoryError>;
    /// 扫描全部未过期任务
    async fn list_all(&self) -> Result<Vec<Task>, RepositoryError>;
}

/// 批次仓库特质
#[async_trait]
pub trait BatchRepository: Send + Sync {
    /// 创建批次，已存在时返回 false
    async fn create(&self, batch: &Batch) -> Result<bool, RepositoryError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Batch>, RepositoryError>;
    /// 按给定顺序加载批次，跳过已过期的
    async fn find_many(&self, ids: &[String]) -> Result<Vec<Batch>, RepositoryError>;
    async fn update(&self, id: &str, mutate: BatchMutation<'_>)
        -> Result<Option<Batch>, RepositoryError>;
    async fn delete(&self, id: &str) -> Result<bool, RepositoryError>;
    /// 扫描全部未过期批次
    async fn list_all(&self) -> Result<Vec<Batch>, RepositoryError>;
}
