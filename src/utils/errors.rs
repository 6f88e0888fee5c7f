// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use thiserror::Error;

use crate::domain::models::task::DomainError;
use crate::domain::repositories::record_store::StoreError;
use crate::domain::repositories::task_repository::RepositoryError;
use crate::engines::traits::ClientError;

/// 生成任务错误类型
///
/// 对应任务编排层对外暴露的错误分类：
/// 网络瞬时错误、熔断、认证、远端拒绝、输入校验与持久化错误
#[derive(Error, Debug)]
pub enum GenflowError {
    /// 瞬时网络错误，可按退避策略重试
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// 熔断器打开，本次不再尝试
    #[error("circuit breaker open: {resource}")]
    CircuitOpen { resource: String },

    /// 认证失败，需要运维修正凭据
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// 远端拒绝（配额、参数等），不可重试
    #[error("Remote rejected request: {0}")]
    RemoteRejected(String),

    /// 输入校验失败
    #[error("Validation error: {0}")]
    Validation(String),

    /// 记录存储不可用
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// 记录未找到
    #[error("Not found: {0}")]
    NotFound(String),

    /// 非法状态转换
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
}

impl From<ClientError> for GenflowError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Authentication(msg) => GenflowError::Authentication(msg),
            ClientError::Rejected(msg) => GenflowError::RemoteRejected(msg),
            other => GenflowError::TransientNetwork(other.to_string()),
        }
    }
}

impl From<DomainError> for GenflowError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::ValidationError(msg) => GenflowError::Validation(msg),
            other => GenflowError::InvalidStateTransition(other.to_string()),
        }
    }
}

impl From<RepositoryError> for GenflowError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Store(e) => GenflowError::Persistence(e),
            RepositoryError::NotFound(key) => GenflowError::NotFound(key),
            RepositoryError::Rejected(e) => e.into(),
        }
    }
}

/// Worker错误类型
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("任务编排错误: {0}")]
    Orchestration(#[from] GenflowError),

    #[error("内部错误: {0}")]
    InternalError(String),
}
