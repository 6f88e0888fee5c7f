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

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use validator::Validate;

use crate::application::dto::task_request::{
    ListTasksQuery, RunNowReport, SubmitTaskRequest, TaskDetail, TaskListResponse, TaskSummary,
};
use crate::config::settings::Settings;
use crate::domain::models::batch::BatchStatus;
use crate::domain::models::index_entry::{paginate_tasks, PageRequest, TaskFilter, TaskPage};
use crate::domain::models::task::Task;
use crate::domain::repositories::record_store::{JsonRecords, RecordStore};
use crate::domain::repositories::task_repository::{BatchRepository, TaskRepository};
use crate::domain::services::batch_service::{
    BatchConfig, BatchManager, DispatchResult, DispatchSummary, RecoveryReport,
};
use crate::domain::services::task_index_service::{CleanupReport, IndexStats, TaskIndexService};
use crate::engines::circuit_breaker::{AggregateStatus, CircuitBreaker, CircuitConfig, CircuitStatus};
use crate::engines::http_client::HttpGenerationClient;
use crate::engines::traits::GenerationClient;
use crate::infrastructure::cache::memory_store::MemoryRecordStore;
use crate::infrastructure::cache::redis_client::RedisRecordStore;
use crate::infrastructure::repositories::batch_repo_impl::BatchRepositoryImpl;
use crate::infrastructure::repositories::task_repo_impl::TaskRepositoryImpl;
use crate::queue::polling_queue::{PollResult, PollingConfig, PollingQueue};
use crate::utils::errors::GenflowError;
use crate::utils::retry_policy::RetryPolicy;

/// 一次调度 tick 的汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub dispatch: DispatchSummary,
    pub polls: Vec<PollResult>,
    pub recovery: RecoveryReport,
    /// 被吸收的步骤级错误
    pub errors: Vec<String>,
}

/// 维护任务结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub cleanup: CleanupReport,
    pub indexed_tasks: usize,
    /// 存储中物理删除的过期记录数
    pub purged_records: usize,
    pub index: Option<IndexStats>,
}

/// 编排器使用的配置子集
#[derive(Debug, Clone)]
struct OrchestratorConfig {
    key_prefix: String,
    max_documents: usize,
    default_priority: i32,
    default_per_page: u32,
    max_per_page: u32,
    max_dispatch_per_tick: usize,
    run_now_cooldown: Duration,
    circuit_resources: Vec<String>,
}

/// 任务编排器
///
/// 运维动作与后台 tick 的统一入口：提交、立即运行、取消、重试、分页列表、熔断器状态与重置。
/// 不持有任何跨调用方的内存锁，所有协调经由记录存储完成。
pub struct TaskOrchestrator {
    store: Arc<dyn RecordStore>,
    task_repo: Arc<dyn TaskRepository>,
    batch_repo: Arc<dyn BatchRepository>,
    batches: Arc<BatchManager>,
    polling: Arc<PollingQueue>,
    breaker: CircuitBreaker,
    index: Option<Arc<TaskIndexService>>,
    config: OrchestratorConfig,
}

impl TaskOrchestrator {
    /// 按配置创建编排器
    ///
    /// 根据 `storage.backend` 连接 Redis 或使用内存存储，并创建 HTTP 远端客户端
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let store: Arc<dyn RecordStore> = match settings.storage.backend.as_str() {
            "memory" => {
                warn!("Using in-memory record store, state is lost on restart");
                Arc::new(MemoryRecordStore::new())
            }
            _ => Arc::new(RedisRecordStore::connect(&settings.redis.url).await?),
        };
        info!(backend = %settings.storage.backend, "Record store initialized");

        let client = HttpGenerationClient::new(
            &settings.remote.base_url,
            settings.remote.api_key.as_deref(),
            Duration::from_secs(settings.remote.timeout_secs),
        )?;

        Ok(Self::with_components(settings, store, Arc::new(client)))
    }

    /// 用给定的存储与远端客户端组装全部组件
    ///
    /// # 参数
    ///
    /// * `settings` - 配置
    /// * `store` - 记录存储
    /// * `client` - 远端生成服务客户端
    pub fn with_components(
        settings: &Settings,
        store: Arc<dyn RecordStore>,
        client: Arc<dyn GenerationClient>,
    ) -> Self {
        let records = JsonRecords::new(store.clone(), settings.storage.max_cas_retries);
        let prefix = settings.storage.key_prefix.as_str();
        let retention = settings.tasks.retention();

        let task_repo: Arc<dyn TaskRepository> =
            Arc::new(TaskRepositoryImpl::new(records.clone(), prefix, retention));
        let batch_repo: Arc<dyn BatchRepository> =
            Arc::new(BatchRepositoryImpl::new(records.clone(), prefix, retention));

        let cb = &settings.circuit_breaker;
        let default_circuit = CircuitConfig {
            failure_threshold: cb.failure_threshold,
            cooldown: Duration::from_secs(cb.cooldown_secs),
        };
        let breaker = CircuitBreaker::new(
            records.clone(),
            prefix,
            default_circuit.clone(),
            Duration::from_secs(cb.state_ttl_secs),
        );
        for (resource, overrides) in &cb.overrides {
            breaker.set_config(
                resource,
                CircuitConfig {
                    failure_threshold: overrides
                        .failure_threshold
                        .unwrap_or(default_circuit.failure_threshold),
                    cooldown: overrides
                        .cooldown_secs
                        .map(Duration::from_secs)
                        .unwrap_or(default_circuit.cooldown),
                },
            );
        }

        let polling_settings = &settings.polling;
        let initial = Duration::from_secs(polling_settings.backoff_initial_secs);
        let cap = Duration::from_secs(polling_settings.backoff_max_secs);
        let backoff = match polling_settings.backoff_mode.as_str() {
            "linear" => RetryPolicy::linear(polling_settings.max_attempts, initial, cap),
            _ => RetryPolicy::exponential(polling_settings.max_attempts, initial, cap),
        };
        let polling = Arc::new(PollingQueue::new(
            records.clone(),
            prefix,
            client.clone(),
            breaker.clone(),
            &settings.remote.resource_name,
            PollingConfig {
                interval: Duration::from_secs(polling_settings.interval_secs),
                max_attempts: polling_settings.max_attempts,
                backoff,
                max_per_tick: polling_settings.max_per_tick,
                concurrency: polling_settings.concurrency,
                claim_ttl: Duration::from_secs(settings.remote.timeout_secs + 5),
                retention,
            },
        ));

        let index = Arc::new(TaskIndexService::new(
            records,
            prefix,
            task_repo.clone(),
            batch_repo.clone(),
            retention,
            Duration::from_secs(settings.maintenance.cleanup_min_interval_secs),
        ));

        let batching = &settings.batching;
        let batches = Arc::new(BatchManager::new(
            task_repo.clone(),
            batch_repo.clone(),
            client,
            breaker.clone(),
            polling.clone(),
            Some(index.clone()),
            store.clone(),
            BatchConfig {
                batch_size: batching.batch_size,
                resource: settings.remote.resource_name.clone(),
                dispatch_retry: RetryPolicy::exponential(
                    batching.max_dispatch_attempts,
                    Duration::from_secs(batching.retry_initial_backoff_secs),
                    Duration::from_secs(batching.retry_max_backoff_secs),
                )
                .with_jitter(0.1),
                stuck_threshold: Duration::from_secs(settings.scheduler.stuck_threshold_secs),
                key_prefix: prefix.to_string(),
            },
        ));

        Self {
            store,
            task_repo,
            batch_repo,
            batches,
            polling,
            breaker,
            index: Some(index),
            config: OrchestratorConfig {
                key_prefix: prefix.to_string(),
                max_documents: settings.tasks.max_documents,
                default_priority: settings.tasks.default_priority,
                default_per_page: settings.tasks.default_per_page,
                max_per_page: settings.tasks.max_per_page,
                max_dispatch_per_tick: settings.scheduler.max_dispatch_per_tick,
                run_now_cooldown: Duration::from_secs(settings.scheduler.run_now_cooldown_secs),
                circuit_resources: cb.resources.clone(),
            },
        }
    }

    /// 不使用任务索引，所有读取走扫描路径
    pub fn without_index(mut self) -> Self {
        self.index = None;
        self
    }

    pub fn task_repository(&self) -> &Arc<dyn TaskRepository> {
        &self.task_repo
    }

    pub fn task_index(&self) -> Option<&Arc<TaskIndexService>> {
        self.index.as_ref()
    }

    pub fn batch_manager(&self) -> &Arc<BatchManager> {
        &self.batches
    }

    pub fn polling_queue(&self) -> &Arc<PollingQueue> {
        &self.polling
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn find_task(&self, task_id: &str) -> Result<Task, GenflowError> {
        self.task_repo
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| GenflowError::NotFound(format!("task {}", task_id)))
    }

    /// 提交任务
    ///
    /// 校验并去重文档列表，创建任务与全部批次。派发由后续 tick 或 RunNow 完成。
    ///
    /// # 参数
    ///
    /// * `request` - 提交请求
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// * `Ok(Task)` - 已创建的任务
    /// * `Err(GenflowError::Validation)` - 文档为空或超过上限
    pub async fn submit_task(
        &self,
        request: SubmitTaskRequest,
        now: DateTime<Utc>,
    ) -> Result<Task, GenflowError> {
        request
            .validate()
            .map_err(|e| GenflowError::Validation(e.to_string()))?;

        let mut seen = HashSet::new();
        let documents: Vec<_> = request
            .document_ids
            .into_iter()
            .filter(|id| seen.insert(*id))
            .collect();
        if documents.is_empty() {
            return Err(GenflowError::Validation("document set is empty".to_string()));
        }
        if documents.len() > self.config.max_documents {
            return Err(GenflowError::Validation(format!(
                "too many documents: {} > {}",
                documents.len(),
                self.config.max_documents
            )));
        }

        let mut task = Task::new(
            request.workflow_type,
            documents,
            request.priority.unwrap_or(self.config.default_priority),
            now,
        );
        if let Some(options) = request.options {
            task.workflow_options = options;
        }

        if !self.task_repo.create(&task).await? {
            return Err(GenflowError::InvalidStateTransition(format!(
                "task {} already exists",
                task.id
            )));
        }
        self.batches.create_batches(&task, now).await?;
        let task = self.find_task(&task.id).await?;

        if let Some(index) = &self.index {
            if let Err(e) = index.upsert_task(&task).await {
                warn!(task_id = %task.id, error = %e, "Failed to index new task");
            }
        }

        counter!("tasks_submitted_total", "workflow" => task.workflow_type.to_string()).increment(1);
        info!(
            task_id = %task.id,
            workflow = %task.workflow_type,
            documents = task.total_posts,
            batches = task.total_batches,
            "Task submitted"
        );
        Ok(task)
    }

    /// 立即运行任务
    ///
    /// 忽略退避立即派发全部 pending 批次，并立即轮询任务的全部订阅。
    /// 冷却期内的重复调用直接返回当前任务。
    pub async fn run_now(&self, task_id: &str, now: DateTime<Utc>) -> Result<RunNowReport, GenflowError> {
        let task = self.find_task(task_id).await?;
        if task.status.is_terminal() {
            return Err(GenflowError::InvalidStateTransition(format!(
                "task {} is {}",
                task_id, task.status
            )));
        }

        let marker = format!("{}:marker:run_now:{}", self.config.key_prefix, task_id);
        if !self
            .store
            .set_if_absent(&marker, &now.to_rfc3339(), self.config.run_now_cooldown)
            .await?
        {
            debug!(task_id, "RunNow within cooldown");
            return Ok(RunNowReport {
                task: task.into(),
                cooled_down: true,
                dispatched: 0,
                circuit_open: false,
                polls: Vec::new(),
                errors: Vec::new(),
            });
        }

        let mut dispatched = 0;
        let mut circuit_open = false;
        let mut errors = Vec::new();

        let mut batches = if task.batch_ids.is_empty() {
            self.batches.create_batches(&task, now).await?
        } else {
            self.batch_repo.find_many(&task.batch_ids).await?
        };
        batches.sort_by_key(|b| b.index);

        for batch in batches.iter().filter(|b| b.status == BatchStatus::Pending) {
            match self.batches.dispatch_batch(&batch.batch_id, now).await {
                Ok(DispatchResult::Dispatched { .. }) | Ok(DispatchResult::CompletedInline) => dispatched += 1,
                Ok(DispatchResult::Skipped { .. }) => {}
                Err(GenflowError::CircuitOpen { .. }) => {
                    circuit_open = true;
                    break;
                }
                Err(e) => errors.push(format!("{}: {}", batch.batch_id, e)),
            }
        }

        self.polling.expedite_task(task_id, now).await?;
        let polls = self
            .polling
            .poll_task(task_id, now, self.batches.as_ref())
            .await?;

        let task = self.find_task(task_id).await?;
        info!(task_id, dispatched, polled = polls.len(), circuit_open, "RunNow finished");
        Ok(RunNowReport {
            task: task.into(),
            cooled_down: false,
            dispatched,
            circuit_open,
            polls,
            errors,
        })
    }

    /// 取消任务，已终结的任务原样返回
    pub async fn cancel(&self, task_id: &str, now: DateTime<Utc>) -> Result<Task, GenflowError> {
        self.batches.cancel_task(task_id, now).await
    }

    /// 重试 failed/cancelled 任务
    pub async fn retry(&self, task_id: &str, now: DateTime<Utc>) -> Result<Task, GenflowError> {
        self.batches.schedule_next_batch(task_id, now).await
    }

    /// 分页列出任务
    ///
    /// 优先使用索引；索引缺失、损坏或过期时扫描任务记录，并用扫描结果重建索引。
    /// 重建不会丢掉扫描之后才写入索引的任务。
    pub async fn list_tasks(&self, query: &ListTasksQuery, now: DateTime<Utc>) -> Result<TaskListResponse, GenflowError> {
        query
            .validate()
            .map_err(|e| GenflowError::Validation(e.to_string()))?;

        let filter = TaskFilter {
            status: query.status,
            workflow_type: query.workflow_type,
        };
        let page = PageRequest::new(
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(self.config.default_per_page),
            self.config.max_per_page,
        );

        Ok(self.paginate(&filter, page, now).await?.into())
    }

    async fn paginate(&self, filter: &TaskFilter, page: PageRequest, now: DateTime<Utc>) -> Result<TaskPage, GenflowError> {
        if let Some(index) = &self.index {
            match index.get_paginated_tasks(filter, page).await {
                Ok(Some(result)) => return Ok(result),
                Ok(None) => debug!("Task index unavailable, falling back to scan"),
                Err(e) => warn!(error = %e, "Task index read failed, falling back to scan"),
            }
        }

        let tasks = self.task_repo.list_all().await?;
        if let Some(index) = &self.index {
            if let Err(e) = index.rebuild_from(&tasks, now).await {
                warn!(error = %e, "Failed to rebuild task index");
            }
        }
        Ok(paginate_tasks(tasks, filter, page))
    }

    /// 任务详情
    pub async fn task_detail(&self, task_id: &str) -> Result<TaskDetail, GenflowError> {
        let task = self.find_task(task_id).await?;
        let mut batches = self.batch_repo.find_many(&task.batch_ids).await?;
        batches.sort_by_key(|b| b.index);
        let poll_entries = self.polling.entries_for_task(task_id).await?;

        Ok(TaskDetail {
            summary: task.into(),
            batches,
            poll_entries,
        })
    }

    /// 运维重置熔断器
    pub async fn reset_circuit_breaker(&self, resource: &str) -> Result<CircuitStatus, GenflowError> {
        if resource.trim().is_empty() {
            return Err(GenflowError::Validation("resource name cannot be empty".to_string()));
        }
        let status = self.breaker.force_reset(resource).await?;
        info!(resource, "Circuit breaker reset by operator");
        Ok(status)
    }

    /// 全部配置资源的聚合熔断状态
    pub async fn circuit_status(&self, now: DateTime<Utc>) -> Result<AggregateStatus, GenflowError> {
        Ok(self
            .breaker
            .aggregate_status(&self.config.circuit_resources, now)
            .await?)
    }

    /// 执行一次完整的后台调度
    ///
    /// 依次派发、轮询与卡住恢复；单个步骤失败只记录在报告中
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        match self
            .batches
            .dispatch_pending(now, self.config.max_dispatch_per_tick)
            .await
        {
            Ok(summary) => report.dispatch = summary,
            Err(e) => report.errors.push(format!("dispatch: {}", e)),
        }

        match self.polling.tick(now, self.batches.as_ref()).await {
            Ok(polls) => report.polls = polls,
            Err(e) => report.errors.push(format!("polling: {}", e)),
        }

        match self.batches.check_and_recover_stuck_tasks(now).await {
            Ok(recovery) => report.recovery = recovery,
            Err(e) => report.errors.push(format!("stuck recovery: {}", e)),
        }

        debug!(
            dispatched = report.dispatch.dispatched,
            polled = report.polls.len(),
            recovered = report.recovery.recovered.len(),
            "Scheduler tick finished"
        );
        report
    }

    /// 维护：过期记录回收、孤儿清理、过期批次清理与索引重建
    ///
    /// # 参数
    ///
    /// * `force` - 忽略清理限流
    /// * `now` - 当前时间
    pub async fn run_maintenance(&self, force: bool, now: DateTime<Utc>) -> Result<MaintenanceReport, GenflowError> {
        let purged_records = self.store.purge_expired().await?;
        if purged_records > 0 {
            info!(purged_records, "Purged expired records");
        }

        let Some(index) = &self.index else {
            return Ok(MaintenanceReport {
                purged_records,
                ..MaintenanceReport::default()
            });
        };

        let mut cleanup = index.cleanup_orphaned_tasks(force).await?;
        if !cleanup.skipped {
            cleanup.removed_batches = index.cleanup_batch_tasks().await?;
        }
        let indexed_tasks = index.rebuild_index(now).await?;

        Ok(MaintenanceReport {
            cleanup,
            indexed_tasks,
            purged_records,
            index: index.stats().await?,
        })
    }
}

impl From<TaskPage> for TaskListResponse {
    fn from(page: TaskPage) -> Self {
        Self {
            tasks: page.tasks.into_iter().map(TaskSummary::from).collect(),
            total: page.total,
            page: page.page,
            total_pages: page.total_pages,
            per_page: page.per_page,
            from_index: page.from_index,
        }
    }
}
