// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use axum::http::StatusCode;
use axum_test::TestServer;
use genflow::presentation::routes;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::helpers::{orchestrator_with, test_settings, ScriptedClient};

fn create_test_server() -> (TestServer, Arc<ScriptedClient>) {
    let client = ScriptedClient::new();
    let orchestrator = orchestrator_with(&test_settings(), client.clone());
    let server = TestServer::new(routes::app(orchestrator)).unwrap();
    (server, client)
}

async fn submit(server: &TestServer, documents: Value) -> Value {
    let response = server
        .post("/v1/tasks")
        .json(&json!({ "workflow_type": "quiz", "document_ids": documents }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()
}

#[tokio::test]
async fn test_health_and_version() {
    let (server, _) = create_test_server();

    server.get("/health").await.assert_text("OK");
    server
        .get("/v1/version")
        .await
        .assert_text(env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_submit_and_fetch_task() {
    let (server, _) = create_test_server();

    let created = submit(&server, json!([5, 6, 5])).await;
    assert_eq!(created["status"], "pending");
    assert_eq!(created["total_posts"], 2);
    assert_eq!(created["progress"], 0);

    let id = created["id"].as_str().unwrap();
    let detail = server.get(&format!("/v1/tasks/{}", id)).await;
    detail.assert_status_ok();
    let body = detail.json::<Value>();
    assert_eq!(body["id"], id);
    assert_eq!(body["batches"].as_array().unwrap().len(), 1);
    assert_eq!(body["batches"][0]["status"], "pending");
}

#[tokio::test]
async fn test_submit_with_no_documents_is_bad_request() {
    let (server, _) = create_test_server();

    let response = server
        .post("/v1/tasks")
        .json(&json!({ "workflow_type": "quiz", "document_ids": [] }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(response.json::<Value>()["error"]
        .as_str()
        .unwrap()
        .contains("document_ids"));
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let (server, _) = create_test_server();

    server
        .get("/v1/tasks/task_missing")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .post("/v1/tasks/task_missing/cancel")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_run_now_then_cooldown() {
    let (server, client) = create_test_server();
    let created = submit(&server, json!([1, 2, 3])).await;
    let id = created["id"].as_str().unwrap();

    let first = server.post(&format!("/v1/tasks/{}/run", id)).await;
    first.assert_status_ok();
    let first = first.json::<Value>();
    assert_eq!(first["cooled_down"], false);
    assert_eq!(first["dispatched"], 1);
    assert_eq!(first["task"]["status"], "completed");

    let second = server.post(&format!("/v1/tasks/{}/run", id)).await;
    second.assert_status(StatusCode::CONFLICT);
    assert_eq!(client.dispatch_calls(), 1);
}

#[tokio::test]
async fn test_cancel_and_retry_through_api() {
    let (server, _) = create_test_server();
    let created = submit(&server, json!([9])).await;
    let id = created["id"].as_str().unwrap();

    server
        .post(&format!("/v1/tasks/{}/retry", id))
        .await
        .assert_status(StatusCode::CONFLICT);

    let cancelled = server.post(&format!("/v1/tasks/{}/cancel", id)).await;
    cancelled.assert_status_ok();
    assert_eq!(cancelled.json::<Value>()["status"], "cancelled");

    let retried = server.post(&format!("/v1/tasks/{}/retry", id)).await;
    retried.assert_status_ok();
    assert_eq!(retried.json::<Value>()["status"], "pending");
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let (server, _) = create_test_server();
    let first = submit(&server, json!([1])).await;
    submit(&server, json!([2])).await;

    let id = first["id"].as_str().unwrap();
    server
        .post(&format!("/v1/tasks/{}/cancel", id))
        .await
        .assert_status_ok();

    let response = server
        .get("/v1/tasks")
        .add_query_param("status", "cancelled")
        .await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["total"], 1);
    assert_eq!(body["tasks"][0]["id"], id);

    server
        .get("/v1/tasks")
        .add_query_param("page", 0)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_tick_and_cleanup_endpoints() {
    let (server, client) = create_test_server();
    submit(&server, json!([1, 2])).await;

    let tick = server.post("/v1/tick").await;
    tick.assert_status_ok();
    assert_eq!(tick.json::<Value>()["dispatch"]["dispatched"], 1);
    assert_eq!(client.dispatch_calls(), 1);

    let cleanup = server.post("/v1/maintenance/cleanup").await;
    cleanup.assert_status_ok();
    assert_eq!(cleanup.json::<Value>()["indexed_tasks"], 1);
}

#[tokio::test]
async fn test_circuit_breaker_endpoints() {
    let (server, _) = create_test_server();

    let status = server.get("/v1/circuit-breakers").await;
    status.assert_status_ok();
    let body = status.json::<Value>();
    assert_eq!(body["is_open"], false);
    assert_eq!(body["resources"].as_array().unwrap().len(), 2);

    let reset = server.post("/v1/circuit-breakers/remote_api/reset").await;
    reset.assert_status_ok();
    assert_eq!(reset.json::<Value>()["failures"], 0);
}
