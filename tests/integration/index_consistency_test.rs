// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::Utc;
use genflow::application::dto::task_request::ListTasksQuery;
use genflow::application::use_cases::task_orchestrator::TaskOrchestrator;
use genflow::domain::models::task::TaskStatus;
use genflow::domain::repositories::task_repository::TaskRepository;
use genflow::infrastructure::cache::memory_store::MemoryRecordStore;
use std::sync::Arc;

use crate::helpers::{orchestrator_with, submit_request, test_settings, ScriptedClient};

#[tokio::test]
async fn test_index_tracks_status_changes_after_rebuild() {
    let settings = test_settings();
    let orchestrator = orchestrator_with(&settings, ScriptedClient::new());
    let now = Utc::now();

    let mut ids = Vec::new();
    for docs in 1..=3 {
        ids.push(orchestrator.submit_task(submit_request(docs), now).await.unwrap().id);
    }

    let scanned = orchestrator
        .list_tasks(&ListTasksQuery::default(), now)
        .await
        .unwrap();
    assert!(!scanned.from_index);
    assert_eq!(scanned.total, 3);

    orchestrator.cancel(&ids[1], now).await.unwrap();

    let cancelled = orchestrator
        .list_tasks(
            &ListTasksQuery {
                status: Some(TaskStatus::Cancelled),
                ..ListTasksQuery::default()
            },
            now,
        )
        .await
        .unwrap();
    assert!(cancelled.from_index);
    assert_eq!(cancelled.total, 1);
    assert_eq!(cancelled.tasks[0].task.id, ids[1]);

    let maintenance = orchestrator.run_maintenance(true, now).await.unwrap();
    assert_eq!(maintenance.indexed_tasks, 3);
}

#[tokio::test]
async fn test_pages_are_newest_first() {
    let settings = test_settings();
    let orchestrator = orchestrator_with(&settings, ScriptedClient::new());
    let now = Utc::now();

    let mut ids = Vec::new();
    for offset in 0..5 {
        let at = now + chrono::Duration::seconds(offset);
        ids.push(orchestrator.submit_task(submit_request(1), at).await.unwrap().id);
    }

    let query = ListTasksQuery {
        page: Some(2),
        per_page: Some(2),
        ..ListTasksQuery::default()
    };
    let page = orchestrator.list_tasks(&query, now).await.unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.total_pages, 3);
    let listed: Vec<&str> = page.tasks.iter().map(|t| t.task.id.as_str()).collect();
    assert_eq!(listed, vec![ids[2].as_str(), ids[1].as_str()]);
}

#[tokio::test]
async fn test_scan_path_without_index_still_dispatches() {
    let settings = test_settings();
    let client = ScriptedClient::new();
    let orchestrator = TaskOrchestrator::with_components(
        &settings,
        Arc::new(MemoryRecordStore::new()),
        client.clone(),
    )
    .without_index();
    let now = Utc::now();

    let task = orchestrator.submit_task(submit_request(3), now).await.unwrap();
    let report = orchestrator.run_tick(now).await;
    assert_eq!(report.dispatch.dispatched, 1);
    assert_eq!(client.dispatch_calls(), 1);

    let listed = orchestrator
        .list_tasks(&ListTasksQuery::default(), now)
        .await
        .unwrap();
    assert!(!listed.from_index);
    assert_eq!(listed.tasks[0].task.id, task.id);
    assert_eq!(listed.tasks[0].task.status, TaskStatus::Processing);
}

#[tokio::test]
async fn test_task_submitted_during_rebuild_is_dispatched_and_listed() {
    let settings = test_settings();
    let client = ScriptedClient::new();
    let orchestrator = orchestrator_with(&settings, client.clone());
    let now = Utc::now();

    let empty = orchestrator
        .list_tasks(&ListTasksQuery::default(), now)
        .await
        .unwrap();
    assert_eq!(empty.total, 0);

    let stale = orchestrator.task_repository().list_all().await.unwrap();
    let task = orchestrator.submit_task(submit_request(3), now).await.unwrap();
    let index = orchestrator.task_index().unwrap();
    index.rebuild_from(&stale, now).await.unwrap();

    let report = orchestrator.run_tick(now).await;
    assert_eq!(report.dispatch.dispatched, 1);
    assert_eq!(client.dispatch_calls(), 1);

    let listed = orchestrator
        .list_tasks(&ListTasksQuery::default(), now)
        .await
        .unwrap();
    assert!(listed.from_index);
    assert_eq!(listed.total, 1);
    assert_eq!(listed.tasks[0].task.id, task.id);
    assert_eq!(listed.tasks[0].task.status, TaskStatus::Processing);
}

#[tokio::test]
async fn test_index_missing_a_task_catches_up_after_one_tick() {
    let settings = test_settings();
    let client = ScriptedClient::new();
    let orchestrator = orchestrator_with(&settings, client.clone());
    let now = Utc::now();

    let stale = orchestrator.task_repository().list_all().await.unwrap();
    let task = orchestrator.submit_task(submit_request(2), now).await.unwrap();
    orchestrator
        .task_index()
        .unwrap()
        .rebuild_from(&stale, now)
        .await
        .unwrap();

    let report = orchestrator.run_tick(now).await;
    assert_eq!(report.dispatch.dispatched, 1);

    let listed = orchestrator
        .list_tasks(&ListTasksQuery::default(), now)
        .await
        .unwrap();
    assert!(listed.from_index);
    assert_eq!(listed.total, 1);
    assert_eq!(listed.tasks[0].task.id, task.id);
}
