// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use crate::application::dto::task_request::{
    ListTasksQuery, RunNowReport, SubmitTaskRequest, TaskDetail, TaskListResponse, TaskSummary,
};
use crate::application::use_cases::task_orchestrator::{MaintenanceReport, TaskOrchestrator, TickReport};
use crate::presentation::errors::AppError;

/// 提交任务
///
/// # 参数
///
/// * `orchestrator` - 任务编排器
/// * `request` - 提交请求
///
/// # 返回值
///
/// * `Ok((StatusCode::CREATED, Json<TaskSummary>))` - 新任务
/// * `Err(AppError)` - 校验失败或存储不可用
pub async fn submit_task(
    Extension(orchestrator): Extension<Arc<TaskOrchestrator>>,
    Json(request): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<TaskSummary>), AppError> {
    let task = orchestrator.submit_task(request, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(task.into())))
}

/// 分页列出任务
pub async fn list_tasks(
    Extension(orchestrator): Extension<Arc<TaskOrchestrator>>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<TaskListResponse>, AppError> {
    Ok(Json(orchestrator.list_tasks(&query, Utc::now()).await?))
}

pub async fn get_task(
    Extension(orchestrator): Extension<Arc<TaskOrchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<TaskDetail>, AppError> {
    Ok(Json(orchestrator.task_detail(&id).await?))
}

/// 立即运行任务
pub async fn run_task(
    Extension(orchestrator): Extension<Arc<TaskOrchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<RunNowReport>, AppError> {
    Ok(Json(orchestrator.run_now(&id, Utc::now()).await?))
}

pub async fn cancel_task(
    Extension(orchestrator): Extension<Arc<TaskOrchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<TaskSummary>, AppError> {
    let task = orchestrator.cancel(&id, Utc::now()).await?;
    Ok(Json(task.into()))
}

pub async fn retry_task(
    Extension(orchestrator): Extension<Arc<TaskOrchestrator>>,
    Path(id): Path<String>,
) -> Result<Json<TaskSummary>, AppError> {
    let task = orchestrator.retry(&id, Utc::now()).await?;
    Ok(Json(task.into()))
}

/// 手动触发一次完整的调度 tick
pub async fn run_tick(
    Extension(orchestrator): Extension<Arc<TaskOrchestrator>>,
) -> Json<TickReport> {
    Json(orchestrator.run_tick(Utc::now()).await)
}

/// 强制执行孤儿清理并重建索引
pub async fn run_cleanup(
    Extension(orchestrator): Extension<Arc<TaskOrchestrator>>,
) -> Result<Json<MaintenanceReport>, AppError> {
    Ok(Json(orchestrator.run_maintenance(true, Utc::now()).await?))
}
