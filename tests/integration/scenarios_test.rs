// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{Duration, Utc};
use genflow::domain::models::batch::BatchStatus;
use genflow::domain::models::task::TaskStatus;
use genflow::engines::traits::{ClientError, DispatchOutcome};
use genflow::queue::polling_queue::PollOutcome;
use genflow::utils::errors::GenflowError;

use crate::helpers::{
    after_poll_interval, batch_id, generation_for, orchestrator_with, submit_request, terminal,
    test_settings, ScriptedClient,
};

#[tokio::test]
async fn test_all_batches_succeed_completes_task() {
    let mut settings = test_settings();
    settings.batching.batch_size = 4;
    let client = ScriptedClient::new();
    let orchestrator = orchestrator_with(&settings, client.clone());
    let now = Utc::now();

    let task = orchestrator.submit_task(submit_request(10), now).await.unwrap();
    let detail = orchestrator.task_detail(&task.id).await.unwrap();
    let sizes: Vec<usize> = detail.batches.iter().map(|b| b.document_ids.len()).collect();
    assert_eq!(sizes, vec![4, 4, 2]);

    let first = orchestrator.run_tick(now).await;
    assert_eq!(first.dispatch.dispatched, 3);
    assert!(first.polls.is_empty());
    assert!(first.errors.is_empty());

    let second = orchestrator.run_tick(after_poll_interval(&settings, now)).await;
    assert_eq!(second.polls.len(), 3);
    assert!(second
        .polls
        .iter()
        .all(|p| matches!(p.outcome, PollOutcome::Completed)));

    let detail = orchestrator.task_detail(&task.id).await.unwrap();
    assert_eq!(detail.summary.task.status, TaskStatus::Completed);
    assert_eq!(detail.summary.task.processed_count, 10);
    assert_eq!(detail.summary.progress, 100);
    assert!(detail.poll_entries.is_empty());
}

#[tokio::test]
async fn test_failed_batch_yields_completed_with_errors() {
    let mut settings = test_settings();
    settings.batching.batch_size = 3;
    let client = ScriptedClient::new();
    let orchestrator = orchestrator_with(&settings, client.clone());
    let now = Utc::now();

    let task = orchestrator.submit_task(submit_request(5), now).await.unwrap();
    assert_eq!(task.total_batches, 2);
    client.script_update(&generation_for(&batch_id(&task.id, 1)), Ok(terminal(0, 2)));

    orchestrator.run_tick(now).await;
    orchestrator.run_tick(after_poll_interval(&settings, now)).await;

    let detail = orchestrator.task_detail(&task.id).await.unwrap();
    assert_eq!(detail.summary.task.status, TaskStatus::CompletedWithErrors);
    assert_eq!(detail.summary.task.processed_count, 3);
    assert_eq!(detail.summary.task.failed_count, 2);
    assert_eq!(detail.batches[0].status, BatchStatus::Completed);
    assert_eq!(detail.batches[1].status, BatchStatus::Failed);
}

#[tokio::test]
async fn test_breaker_opens_after_threshold_and_resets() {
    let mut settings = test_settings();
    settings.circuit_breaker.failure_threshold = 3;
    let orchestrator = orchestrator_with(&settings, ScriptedClient::new());
    let breaker = orchestrator.circuit_breaker();
    let now = Utc::now();

    for _ in 0..3 {
        breaker.record_failure_at("remote_api", now).await.unwrap();
    }
    let status = breaker.get_status_at("remote_api", now).await.unwrap();
    assert!(status.is_open);
    assert_eq!(status.failures, 3);

    let aggregate = orchestrator.circuit_status(now).await.unwrap();
    assert!(aggregate.is_open);

    let reset = orchestrator.reset_circuit_breaker("remote_api").await.unwrap();
    assert!(!reset.is_open);
    assert_eq!(reset.failures, 0);
    assert!(!orchestrator.circuit_status(now).await.unwrap().is_open);
}

#[tokio::test]
async fn test_transient_dispatch_failures_trip_breaker_and_halt_dispatch() {
    let mut settings = test_settings();
    settings.batching.batch_size = 4;
    settings.circuit_breaker.failure_threshold = 3;
    let client = ScriptedClient::new();
    let orchestrator = orchestrator_with(&settings, client.clone());
    let now = Utc::now();

    let task = orchestrator.submit_task(submit_request(10), now).await.unwrap();
    for index in 0..3 {
        client.script_dispatch(
            &batch_id(&task.id, index),
            Err(ClientError::Transient("HTTP 503".to_string())),
        );
    }

    let first = orchestrator.run_tick(now).await;
    assert_eq!(first.dispatch.failed, 3);
    assert_eq!(client.dispatch_calls(), 3);

    let later = now + Duration::seconds(120);
    let second = orchestrator.run_tick(later).await;
    assert!(second.dispatch.circuit_open);
    assert_eq!(client.dispatch_calls(), 3);

    let detail = orchestrator.task_detail(&task.id).await.unwrap();
    assert!(detail
        .batches
        .iter()
        .all(|b| b.status == BatchStatus::Pending && b.dispatch_attempts == 1));
}

#[tokio::test]
async fn test_cancel_stops_polling() {
    let mut settings = test_settings();
    settings.batching.batch_size = 2;
    let client = ScriptedClient::new();
    let orchestrator = orchestrator_with(&settings, client.clone());
    let now = Utc::now();

    let task = orchestrator.submit_task(submit_request(4), now).await.unwrap();
    orchestrator.run_tick(now).await;
    assert_eq!(orchestrator.polling_queue().entries().await.unwrap().len(), 2);

    let cancelled = orchestrator.cancel(&task.id, now).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    let detail = orchestrator.task_detail(&task.id).await.unwrap();
    assert!(detail
        .batches
        .iter()
        .all(|b| b.status == BatchStatus::Cancelled));

    let report = orchestrator.run_tick(after_poll_interval(&settings, now)).await;
    assert!(report.polls.is_empty());
    assert_eq!(client.fetch_calls(), 0);

    let again = orchestrator.cancel(&task.id, now).await.unwrap();
    assert_eq!(again.status, TaskStatus::Cancelled);
}

#[tokio::test]
async fn test_retry_requeues_failed_task_and_rejects_completed() {
    let settings = test_settings();
    let client = ScriptedClient::new();
    let orchestrator = orchestrator_with(&settings, client.clone());
    let now = Utc::now();

    let task = orchestrator.submit_task(submit_request(3), now).await.unwrap();
    client.script_dispatch(
        &batch_id(&task.id, 0),
        Err(ClientError::Rejected("HTTP 422: quota".to_string())),
    );
    orchestrator.run_tick(now).await;

    let failed = orchestrator.task_detail(&task.id).await.unwrap();
    assert_eq!(failed.summary.task.status, TaskStatus::Failed);
    assert!(!orchestrator
        .circuit_breaker()
        .get_status_at("remote_api", now)
        .await
        .unwrap()
        .is_open);

    let retried = orchestrator.retry(&task.id, now).await.unwrap();
    assert_eq!(retried.status, TaskStatus::Pending);
    assert_eq!(retried.failed_batches, 0);

    let report = orchestrator.run_tick(now).await;
    assert_eq!(report.dispatch.dispatched, 1);
    orchestrator.run_tick(after_poll_interval(&settings, now)).await;

    let completed = orchestrator.task_detail(&task.id).await.unwrap();
    assert_eq!(completed.summary.task.status, TaskStatus::Completed);

    let err = orchestrator.retry(&task.id, now).await.unwrap_err();
    assert!(matches!(err, GenflowError::InvalidStateTransition(_)));
}

#[tokio::test]
async fn test_inline_completion_skips_polling() {
    let settings = test_settings();
    let client = ScriptedClient::new();
    let orchestrator = orchestrator_with(&settings, client.clone());
    let now = Utc::now();

    let task = orchestrator.submit_task(submit_request(2), now).await.unwrap();
    client.script_dispatch(
        &batch_id(&task.id, 0),
        Ok(DispatchOutcome::Completed(terminal(2, 0))),
    );

    let report = orchestrator.run_now(&task.id, now).await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.task.task.status, TaskStatus::Completed);
    assert!(orchestrator.polling_queue().entries().await.unwrap().is_empty());
    assert_eq!(client.fetch_calls(), 0);
}
