// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::Utc;
use genflow::application::use_cases::task_orchestrator::TaskOrchestrator;
use genflow::domain::models::task::{TaskAction, TaskStatus, WorkflowType};
use genflow::engines::http_client::HttpGenerationClient;
use genflow::engines::traits::{ClientError, DispatchOutcome, DispatchRequest, GenerationClient};
use genflow::infrastructure::cache::memory_store::MemoryRecordStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{submit_request, test_settings};

fn client_for(server: &MockServer, api_key: Option<&str>) -> HttpGenerationClient {
    HttpGenerationClient::new(
        &format!("{}/api/v1", server.uri()),
        api_key,
        Duration::from_secs(5),
    )
    .unwrap()
}

fn dispatch_request() -> DispatchRequest {
    DispatchRequest {
        task_id: "task_1".to_string(),
        batch_id: "task_1-b0".to_string(),
        workflow_type: WorkflowType::Summary,
        action: TaskAction::Single,
        document_ids: vec![42],
        options: json!({}),
    }
}

#[tokio::test]
async fn test_dispatch_sends_bearer_token_and_decodes_acceptance() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/generations"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(
            ResponseTemplate::new(202)
                .set_body_json(json!({"status": "accepted", "generation_id": "gen-42"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server, Some("secret"))
        .dispatch(&dispatch_request())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        DispatchOutcome::Accepted {
            generation_id: "gen-42".to_string()
        }
    );
}

#[tokio::test]
async fn test_status_codes_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/generations"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/generations/gen-busy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    let auth = client.dispatch(&dispatch_request()).await.unwrap_err();
    assert!(matches!(auth, ClientError::Authentication(_)));
    assert!(!auth.trips_breaker());

    let busy = client.fetch_updates("gen-busy").await.unwrap_err();
    assert!(matches!(busy, ClientError::Transient(_)));
    assert!(busy.trips_breaker());
}

#[tokio::test]
async fn test_update_without_terminal_flag_is_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/generations/gen-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success_count": 1})))
        .mount(&server)
        .await;

    let err = client_for(&server, None)
        .fetch_updates("gen-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_generation_id_with_reserved_characters_stays_in_one_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/generations/batch%2F1%3Fx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": {},
            "success_count": 1,
            "fail_count": 0,
            "is_terminal": true
        })))
        .expect(1)
        .mount(&server)
        .await;

    let update = client_for(&server, None)
        .fetch_updates("batch/1?x")
        .await
        .unwrap();
    assert!(update.is_terminal);
    assert_eq!(update.success_count, 1);
}

#[tokio::test]
async fn test_task_completes_against_remote_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/generations"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "accepted", "generation_id": "gen-remote"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/generations/gen-remote"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": {"1": {"summary": "a"}, "2": {"summary": "b"}},
            "success_count": 2,
            "fail_count": 0,
            "is_terminal": true
        })))
        .mount(&server)
        .await;

    let settings = test_settings();
    let orchestrator = TaskOrchestrator::with_components(
        &settings,
        Arc::new(MemoryRecordStore::new()),
        Arc::new(client_for(&server, None)),
    );
    let now = Utc::now();

    let task = orchestrator.submit_task(submit_request(2), now).await.unwrap();
    let report = orchestrator.run_now(&task.id, now).await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.task.task.status, TaskStatus::Completed);

    let detail = orchestrator.task_detail(&task.id).await.unwrap();
    assert_eq!(detail.batches[0].results.get(&2).unwrap()["summary"], "b");
}
