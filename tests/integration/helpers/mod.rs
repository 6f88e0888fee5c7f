// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use genflow::application::dto::task_request::SubmitTaskRequest;
use genflow::application::use_cases::task_orchestrator::TaskOrchestrator;
use genflow::config::settings::Settings;
use genflow::domain::models::batch::Batch;
use genflow::domain::models::generation::GenerationUpdate;
use genflow::domain::models::task::WorkflowType;
use genflow::engines::traits::{ClientError, DispatchOutcome, DispatchRequest, GenerationClient};
use genflow::infrastructure::cache::memory_store::MemoryRecordStore;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 按批次ID与生成ID编排响应的远端客户端
///
/// 未编排的派发返回 `gen-{batch_id}`，未编排的轮询返回全部成功的终态结果
#[derive(Default)]
pub struct ScriptedClient {
    dispatches: Mutex<HashMap<String, VecDeque<Result<DispatchOutcome, ClientError>>>>,
    updates: Mutex<HashMap<String, VecDeque<Result<GenerationUpdate, ClientError>>>>,
    sizes: Mutex<HashMap<String, u32>>,
    dispatch_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_dispatch(&self, batch_id: &str, response: Result<DispatchOutcome, ClientError>) {
        self.dispatches
            .lock()
            .unwrap()
            .entry(batch_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn script_update(&self, generation_id: &str, response: Result<GenerationUpdate, ClientError>) {
        self.updates
            .lock()
            .unwrap()
            .entry(generation_id.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn dispatch_calls(&self) -> usize {
        self.dispatch_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchOutcome, ClientError> {
        self.dispatch_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .dispatches
            .lock()
            .unwrap()
            .get_mut(&request.batch_id)
            .and_then(|queue| queue.pop_front());
        if let Some(response) = scripted {
            return response;
        }

        let generation_id = generation_for(&request.batch_id);
        self.sizes
            .lock()
            .unwrap()
            .insert(generation_id.clone(), request.document_ids.len() as u32);
        Ok(DispatchOutcome::Accepted { generation_id })
    }

    async fn fetch_updates(&self, generation_id: &str) -> Result<GenerationUpdate, ClientError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .updates
            .lock()
            .unwrap()
            .get_mut(generation_id)
            .and_then(|queue| queue.pop_front());
        if let Some(response) = scripted {
            return response;
        }

        let size = self.sizes.lock().unwrap().get(generation_id).copied().unwrap_or(0);
        Ok(terminal(size, 0))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// 默认派发使用的生成ID
pub fn generation_for(batch_id: &str) -> String {
    format!("gen-{}", batch_id)
}

#[allow(dead_code)]
pub fn batch_id(task_id: &str, index: usize) -> String {
    Batch::id_for(task_id, index)
}

pub fn terminal(success: u32, fail: u32) -> GenerationUpdate {
    GenerationUpdate {
        success_count: success,
        fail_count: fail,
        is_terminal: true,
        ..GenerationUpdate::in_progress()
    }
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::with_defaults().unwrap();
    settings.storage.backend = "memory".to_string();
    settings.metrics.enabled = false;
    settings
}

pub fn orchestrator_with(settings: &Settings, client: Arc<ScriptedClient>) -> Arc<TaskOrchestrator> {
    Arc::new(TaskOrchestrator::with_components(
        settings,
        Arc::new(MemoryRecordStore::new()),
        client,
    ))
}

pub fn submit_request(documents: u64) -> SubmitTaskRequest {
    SubmitTaskRequest {
        workflow_type: WorkflowType::Quiz,
        document_ids: (1..=documents).collect(),
        priority: None,
        options: None,
    }
}

/// 越过首次轮询间隔的时间点
pub fn after_poll_interval(settings: &Settings, now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::seconds(settings.polling.interval_secs as i64 + 1)
}
