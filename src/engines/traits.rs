// Copyright 2025 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::models::generation::GenerationUpdate;
use crate::domain::models::task::{DocumentId, TaskAction, WorkflowType};

/// 远端客户端错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// 瞬时错误（连接失败、5xx、限流）
    #[error("Transient failure: {0}")]
    Transient(String),
    /// 认证失败（401/403）
    #[error("Authentication failed: {0}")]
    Authentication(String),
    /// 远端拒绝（其它 4xx）
    #[error("Request rejected: {0}")]
    Rejected(String),
    /// 响应无法解析
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// 超时
    #[error("Timeout")]
    Timeout,
}

impl ClientError {
    /// 判断错误是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transient(_) | ClientError::Timeout | ClientError::InvalidResponse(_)
        )
    }

    /// 是否计入熔断器失败次数
    ///
    /// 认证与拒绝类错误不代表服务故障，不应触发熔断
    pub fn trips_breaker(&self) -> bool {
        self.is_retryable()
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            classify_status(status.as_u16(), &err.to_string())
        } else {
            ClientError::Transient(err.to_string())
        }
    }
}

/// 按 HTTP 状态码分类远端错误
pub fn classify_status(status: u16, body: &str) -> ClientError {
    let message = format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>());
    match status {
        401 | 403 => ClientError::Authentication(message),
        408 | 425 | 429 => ClientError::Transient(message),
        500..=599 => ClientError::Transient(message),
        _ => ClientError::Rejected(message),
    }
}

/// 派发请求
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRequest {
    pub task_id: String,
    pub batch_id: String,
    pub workflow_type: WorkflowType,
    pub action: TaskAction,
    pub document_ids: Vec<DocumentId>,
    pub options: serde_json::Value,
}

/// 派发结果：远端接受并返回生成ID，或同步返回了结果
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Accepted { generation_id: String },
    Completed(GenerationUpdate),
}

/// 远端生成服务客户端特质
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// 派发一批文档
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchOutcome, ClientError>;

    /// 获取生成进度
    async fn fetch_updates(&self, generation_id: &str) -> Result<GenerationUpdate, ClientError>;

    /// 客户端名称
    fn name(&self) -> &'static str;
}
