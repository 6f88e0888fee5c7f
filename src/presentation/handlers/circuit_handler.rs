// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::application::use_cases::task_orchestrator::TaskOrchestrator;
use crate::engines::circuit_breaker::{AggregateStatus, CircuitStatus};
use crate::presentation::errors::AppError;

/// 聚合熔断状态，附带每个资源的状态
pub async fn circuit_status(
    Extension(orchestrator): Extension<Arc<TaskOrchestrator>>,
) -> Result<Json<AggregateStatus>, AppError> {
    Ok(Json(orchestrator.circuit_status(Utc::now()).await?))
}

/// 重置指定资源的熔断器
///
/// # 参数
///
/// * `name` - 资源名，例如 `remote_api`
pub async fn reset_circuit(
    Extension(orchestrator): Extension<Arc<TaskOrchestrator>>,
    Path(name): Path<String>,
) -> Result<Json<CircuitStatus>, AppError> {
    Ok(Json(orchestrator.reset_circuit_breaker(&name).await?))
}
