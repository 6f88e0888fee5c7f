// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::application::use_cases::task_orchestrator::TaskOrchestrator;
use crate::presentation::handlers::{circuit_handler, task_handler};

/// 创建应用路由
///
/// # 返回值
///
/// 返回配置好的路由
pub fn routes() -> Router {
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/v1/version", get(version));

    let operator_routes = Router::new()
        .route(
            "/v1/tasks",
            post(task_handler::submit_task).get(task_handler::list_tasks),
        )
        .route("/v1/tasks/{id}", get(task_handler::get_task))
        .route("/v1/tasks/{id}/run", post(task_handler::run_task))
        .route("/v1/tasks/{id}/cancel", post(task_handler::cancel_task))
        .route("/v1/tasks/{id}/retry", post(task_handler::retry_task))
        .route("/v1/tick", post(task_handler::run_tick))
        .route("/v1/circuit-breakers", get(circuit_handler::circuit_status))
        .route(
            "/v1/circuit-breakers/{name}/reset",
            post(circuit_handler::reset_circuit),
        )
        .route("/v1/maintenance/cleanup", post(task_handler::run_cleanup));

    Router::new().merge(public_routes).merge(operator_routes)
}

/// 完整应用：路由、编排器与请求追踪
pub fn app(orchestrator: Arc<TaskOrchestrator>) -> Router {
    routes()
        .layer(Extension(orchestrator))
        .layer(TraceLayer::new_for_http())
}

/// 健康检查端点
///
/// # 返回值
///
/// 返回"OK"字符串
pub async fn health_check() -> &'static str {
    "OK"
}

/// 版本信息端点
///
/// # 返回值
///
/// 返回应用版本号
pub async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
