// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::models::batch::{Batch, BatchStatus};
use crate::domain::models::generation::GenerationUpdate;
use crate::domain::models::poll_entry::PollQueueEntry;
use crate::domain::models::task::{Task, TaskStatus};
use crate::domain::repositories::record_store::{RecordStore, StoreError};
use crate::domain::repositories::task_repository::{BatchRepository, TaskRepository};
use crate::domain::services::task_index_service::TaskIndexService;
use crate::engines::circuit_breaker::CircuitBreaker;
use crate::engines::traits::{ClientError, DispatchOutcome, DispatchRequest, GenerationClient};
use crate::queue::polling_queue::{PollResultHandler, PollingQueue};
use crate::utils::errors::GenflowError;
use crate::utils::retry_policy::RetryPolicy;

/// 批次管理配置
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// 每批文档数
    pub batch_size: usize,
    /// 熔断资源名
    pub resource: String,
    /// 派发重试策略，`max_retries` 为最大派发次数
    pub dispatch_retry: RetryPolicy,
    /// 无进展多久视为卡住
    pub stuck_threshold: Duration,
    /// 键前缀
    pub key_prefix: String,
}

/// 单个批次的派发结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DispatchResult {
    /// 远端已接受，等待轮询
    Dispatched { generation_id: String },
    /// 远端同步返回了终态结果
    CompletedInline,
    /// 批次或任务已不需要派发
    Skipped { reason: String },
}

/// 一轮派发的汇总
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSummary {
    pub dispatched: usize,
    pub completed_inline: usize,
    pub failed: usize,
    /// 熔断器打开，本轮提前结束
    pub circuit_open: bool,
    pub errors: Vec<String>,
}

/// 卡住任务恢复结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// 超过阈值的任务数
    pub stuck: usize,
    /// 本次重新派发的任务
    pub recovered: Vec<String>,
    /// 已由其它调用方处理
    pub already_handled: usize,
}

/// 批次管理器
///
/// 负责切分批次、经熔断器派发、合并远端结果、汇总任务进度以及恢复卡住的任务。
/// 所有状态都保存在记录存储中，可被多个调用方并发调用。
pub struct BatchManager {
    task_repo: Arc<dyn TaskRepository>,
    batch_repo: Arc<dyn BatchRepository>,
    client: Arc<dyn GenerationClient>,
    breaker: CircuitBreaker,
    polling: Arc<PollingQueue>,
    index: Option<Arc<TaskIndexService>>,
    markers: Arc<dyn RecordStore>,
    config: BatchConfig,
}

impl BatchManager {
    /// 创建批次管理器
    ///
    /// # 参数
    ///
    /// * `task_repo` - 任务仓库
    /// * `batch_repo` - 批次仓库
    /// * `client` - 远端生成服务客户端
    /// * `breaker` - 熔断器
    /// * `polling` - 轮询队列
    /// * `index` - 可选的任务索引
    /// * `markers` - 去重标记使用的记录存储
    /// * `config` - 配置
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        batch_repo: Arc<dyn BatchRepository>,
        client: Arc<dyn GenerationClient>,
        breaker: CircuitBreaker,
        polling: Arc<PollingQueue>,
        index: Option<Arc<TaskIndexService>>,
        markers: Arc<dyn RecordStore>,
        config: BatchConfig,
    ) -> Self {
        Self {
            task_repo,
            batch_repo,
            client,
            breaker,
            polling,
            index,
            markers,
            config,
        }
    }

    pub fn resource(&self) -> &str {
        &self.config.resource
    }

    /// 同步索引中的任务状态，失败只记录日志
    async fn sync_index(&self, task: &Task) {
        if let Some(index) = &self.index {
            if let Err(e) = index.update_task_status(&task.id, task.status, task.updated_at).await {
                warn!(task_id = %task.id, error = %e, "Failed to update task index");
            }
        }
    }

    /// 切分批次
    ///
    /// 按固定大小顺序切分文档，批次ID由任务ID与序号决定，重复调用得到相同的批次
    ///
    /// # 参数
    ///
    /// * `task` - 任务
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// 按创建顺序排列的批次
    pub async fn create_batches(&self, task: &Task, now: DateTime<Utc>) -> Result<Vec<Batch>, GenflowError> {
        let size = self.config.batch_size.max(1);
        let mut batches = Vec::with_capacity(task.document_ids.len().div_ceil(size));

        for (index, chunk) in task.document_ids.chunks(size).enumerate() {
            let batch = Batch::new(&task.id, index, chunk.to_vec(), now);
            if self.batch_repo.create(&batch).await? {
                batches.push(batch);
                continue;
            }
            if let Some(existing) = self.batch_repo.find_by_id(&batch.batch_id).await? {
                batches.push(existing);
                continue;
            }
            // 已存在的批次在读取前过期，再创建一次
            if self.batch_repo.create(&batch).await? {
                batches.push(batch);
                continue;
            }
            let existing = self
                .batch_repo
                .find_by_id(&batch.batch_id)
                .await?
                .ok_or_else(|| {
                    GenflowError::Persistence(StoreError::Conflict(format!(
                        "batch {} could not be created",
                        batch.batch_id
                    )))
                })?;
            batches.push(existing);
        }

        let ids: Vec<String> = batches.iter().map(|b| b.batch_id.clone()).collect();
        let total = ids.len() as u32;
        let updated = self
            .task_repo
            .update(&task.id, &|t: &mut Task| {
                if t.status != TaskStatus::Pending || !t.batch_ids.is_empty() {
                    return Ok(false);
                }
                t.batch_ids = ids.clone();
                t.total_batches = total;
                t.updated_at = now;
                Ok(true)
            })
            .await?;

        if updated.is_none() {
            return Err(GenflowError::NotFound(format!("task {}", task.id)));
        }
        debug!(task_id = %task.id, batches = total, "Batches created");
        Ok(batches)
    }

    async fn mark_task_scheduled(&self, task_id: &str, now: DateTime<Utc>) -> Result<(), GenflowError> {
        let updated = self
            .task_repo
            .update(task_id, &|t: &mut Task| Ok(t.mark_scheduled(now)))
            .await?;
        if let Some(task) = updated {
            if task.scheduled_at == Some(now) {
                self.sync_index(&task).await;
            }
        }
        Ok(())
    }

    /// 派发单个批次
    ///
    /// 先检查熔断器，被拒绝时批次保持 pending 并返回可重试错误。
    /// 网络调用期间不持有任何记录。
    ///
    /// # 参数
    ///
    /// * `batch_id` - 批次ID
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// * `Ok(DispatchResult)` - 派发结果
    /// * `Err(GenflowError)` - 熔断打开、远端错误或存储错误
    pub async fn dispatch_batch(&self, batch_id: &str, now: DateTime<Utc>) -> Result<DispatchResult, GenflowError> {
        let batch = self
            .batch_repo
            .find_by_id(batch_id)
            .await?
            .ok_or_else(|| GenflowError::NotFound(format!("batch {}", batch_id)))?;
        if batch.status != BatchStatus::Pending {
            return Ok(DispatchResult::Skipped {
                reason: format!("batch is {}", batch.status),
            });
        }

        let task = self
            .task_repo
            .find_by_id(&batch.task_id)
            .await?
            .ok_or_else(|| GenflowError::NotFound(format!("task {}", batch.task_id)))?;
        if task.status.is_terminal() {
            return Ok(DispatchResult::Skipped {
                reason: format!("task is {}", task.status),
            });
        }

        let resource = self.config.resource.clone();
        if !self.breaker.allow_at(&resource, now).await? {
            debug!(batch_id, "Dispatch deferred, circuit breaker open");
            return Err(GenflowError::CircuitOpen { resource });
        }

        self.mark_task_scheduled(&task.id, now).await?;

        let request = DispatchRequest {
            task_id: task.id.clone(),
            batch_id: batch.batch_id.clone(),
            workflow_type: task.workflow_type,
            action: task.action,
            document_ids: batch.document_ids.clone(),
            options: task.workflow_options.clone(),
        };

        match self.client.dispatch(&request).await {
            Ok(DispatchOutcome::Accepted { generation_id }) => {
                self.breaker.record_success_at(&resource, now).await?;
                self.on_accepted(&task, &batch, &generation_id, now).await
            }
            Ok(DispatchOutcome::Completed(update)) if update.is_terminal => {
                self.breaker.record_success_at(&resource, now).await?;
                self.batch_repo
                    .update(batch_id, &|b: &mut Batch| {
                        if b.status != BatchStatus::Pending {
                            return Ok(false);
                        }
                        b.dispatch_attempts += 1;
                        b.dispatched_at = Some(now);
                        b.merge_update(&update, now);
                        Ok(true)
                    })
                    .await?;
                counter!("batches_dispatched_total", "outcome" => "inline").increment(1);
                self.refresh_task(&task.id, now).await?;
                Ok(DispatchResult::CompletedInline)
            }
            Ok(DispatchOutcome::Completed(_)) => {
                let err = ClientError::InvalidResponse(
                    "inline result without generation id was not terminal".to_string(),
                );
                self.handle_dispatch_failure(&batch, err, now).await
            }
            Err(err) => self.handle_dispatch_failure(&batch, err, now).await,
        }
    }

    async fn on_accepted(
        &self,
        task: &Task,
        batch: &Batch,
        generation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchResult, GenflowError> {
        let updated = self
            .batch_repo
            .update(&batch.batch_id, &|b: &mut Batch| {
                if b.status != BatchStatus::Pending {
                    return Ok(false);
                }
                b.status = BatchStatus::Dispatched;
                b.generation_id = Some(generation_id.to_string());
                b.dispatch_attempts += 1;
                b.dispatched_at = Some(now);
                b.next_dispatch_at = None;
                b.last_error = None;
                b.updated_at = now;
                Ok(true)
            })
            .await?;

        let Some(updated) = updated.filter(|b| b.generation_id.as_deref() == Some(generation_id)) else {
            info!(batch_id = %batch.batch_id, generation_id, "Batch changed during dispatch, not polling it");
            return Ok(DispatchResult::Skipped {
                reason: "batch changed during dispatch".to_string(),
            });
        };

        let entry = PollQueueEntry::for_batch(
            generation_id,
            &updated,
            task.workflow_type,
            task.priority,
            now,
            self.polling.first_poll_at(now),
        );
        self.polling.enqueue(entry).await?;

        // 入队期间任务可能已被取消，此时撤回刚入队的订阅
        if !self.still_polling(&task.id, &batch.batch_id, generation_id).await? {
            self.polling.mark_generation_complete(generation_id).await?;
            info!(batch_id = %batch.batch_id, generation_id, "Batch finished during dispatch, poll entry withdrawn");
            return Ok(DispatchResult::Skipped {
                reason: "batch changed during dispatch".to_string(),
            });
        }

        counter!("batches_dispatched_total", "outcome" => "accepted").increment(1);
        info!(task_id = %task.id, batch_id = %batch.batch_id, generation_id, "Batch dispatched");
        self.refresh_task(&task.id, now).await?;
        Ok(DispatchResult::Dispatched {
            generation_id: generation_id.to_string(),
        })
    }

    async fn still_polling(&self, task_id: &str, batch_id: &str, generation_id: &str) -> Result<bool, GenflowError> {
        let task_active = self
            .task_repo
            .find_by_id(task_id)
            .await?
            .is_some_and(|t| !t.status.is_terminal());
        if !task_active {
            return Ok(false);
        }
        Ok(self.batch_repo.find_by_id(batch_id).await?.is_some_and(|b| {
            b.status == BatchStatus::Dispatched && b.generation_id.as_deref() == Some(generation_id)
        }))
    }

    async fn handle_dispatch_failure(
        &self,
        batch: &Batch,
        err: ClientError,
        now: DateTime<Utc>,
    ) -> Result<DispatchResult, GenflowError> {
        if err.trips_breaker() {
            self.breaker.record_failure_at(&self.config.resource, now).await?;
        }

        let permanent = matches!(err, ClientError::Authentication(_) | ClientError::Rejected(_));
        let message = err.to_string();
        let policy = &self.config.dispatch_retry;

        let updated = self
            .batch_repo
            .update(&batch.batch_id, &|b: &mut Batch| {
                if b.status != BatchStatus::Pending {
                    return Ok(false);
                }
                b.dispatch_attempts += 1;
                if permanent {
                    b.fail_with(&message, now);
                } else if !policy.should_retry(b.dispatch_attempts) {
                    b.fail_with(&format!("dispatch retries exhausted: {}", message), now);
                } else {
                    b.last_error = Some(message.clone());
                    b.next_dispatch_at = Some(policy.next_retry_time(b.dispatch_attempts, now));
                    b.updated_at = now;
                }
                Ok(true)
            })
            .await?;

        counter!("batch_dispatch_failures_total", "permanent" => permanent.to_string()).increment(1);
        match &updated {
            Some(b) if b.status == BatchStatus::Failed => {
                error!(batch_id = %b.batch_id, error = %message, "Batch dispatch failed permanently");
                self.refresh_task(&b.task_id, now).await?;
            }
            Some(b) => {
                warn!(
                    batch_id = %b.batch_id,
                    attempts = b.dispatch_attempts,
                    next_dispatch_at = ?b.next_dispatch_at,
                    error = %message,
                    "Batch dispatch failed, will retry"
                );
            }
            None => {}
        }

        Err(err.into())
    }

    /// 按任务优先级派发到期的 pending 批次
    ///
    /// 候选任务来自任务记录扫描，扫描结果顺带补齐索引。
    /// 单个批次的失败记录在批次上并继续处理其它批次；熔断器打开时提前结束
    ///
    /// # 参数
    ///
    /// * `now` - 当前时间
    /// * `limit` - 本轮最多尝试派发的批次数
    pub async fn dispatch_pending(&self, now: DateTime<Utc>, limit: usize) -> Result<DispatchSummary, GenflowError> {
        let mut summary = DispatchSummary::default();
        let mut attempted = 0;

        let scanned = self.task_repo.list_all().await?;
        self.reconcile_index(&scanned).await;
        let mut tasks: Vec<Task> = scanned
            .into_iter()
            .filter(|t| TaskStatus::ACTIVE.contains(&t.status))
            .collect();
        tasks.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));

        for task in tasks {
            if attempted >= limit {
                break;
            }

            let mut batches = if task.batch_ids.is_empty() {
                match self.create_batches(&task, now).await {
                    Ok(batches) => batches,
                    Err(e) => {
                        summary.errors.push(format!("{}: {}", task.id, e));
                        continue;
                    }
                }
            } else {
                self.batch_repo.find_many(&task.batch_ids).await?
            };
            batches.sort_by_key(|b| b.index);

            for batch in batches.iter().filter(|b| b.is_due(now)) {
                if attempted >= limit {
                    break;
                }
                attempted += 1;

                match self.dispatch_batch(&batch.batch_id, now).await {
                    Ok(DispatchResult::Dispatched { .. }) => summary.dispatched += 1,
                    Ok(DispatchResult::CompletedInline) => summary.completed_inline += 1,
                    Ok(DispatchResult::Skipped { .. }) => {}
                    Err(GenflowError::CircuitOpen { .. }) => {
                        summary.circuit_open = true;
                        return Ok(summary);
                    }
                    Err(e) => {
                        summary.failed += 1;
                        summary.errors.push(format!("{}: {}", batch.batch_id, e));
                    }
                }
            }
        }

        Ok(summary)
    }

    /// 指定状态的任务，直接扫描任务记录
    ///
    /// 索引可能落后于任务记录，派发与恢复从不依赖它
    async fn active_tasks(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>, GenflowError> {
        Ok(self
            .task_repo
            .list_all()
            .await?
            .into_iter()
            .filter(|t| statuses.contains(&t.status))
            .collect())
    }

    /// 用扫描结果补齐索引，失败只记录日志
    async fn reconcile_index(&self, tasks: &[Task]) {
        if let Some(index) = &self.index {
            if let Err(e) = index.reconcile(tasks).await {
                warn!(error = %e, "Failed to reconcile task index");
            }
        }
    }

    /// 幂等地合并远端结果并刷新任务
    ///
    /// # 返回值
    ///
    /// 合并后的批次，批次已过期时为 None
    pub async fn apply_remote_result(
        &self,
        batch_id: &str,
        update: &GenerationUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Batch>, GenflowError> {
        let updated = self
            .batch_repo
            .update(batch_id, &|b: &mut Batch| Ok(b.merge_update(update, now)))
            .await?;

        if let Some(batch) = &updated {
            debug!(
                batch_id,
                status = %batch.status,
                success = batch.success_count,
                failed = batch.fail_count,
                "Remote result applied"
            );
            self.refresh_task(&batch.task_id, now).await?;
        }
        Ok(updated)
    }

    /// 按全部批次重新汇总任务计数与状态
    pub async fn refresh_task(&self, task_id: &str, now: DateTime<Utc>) -> Result<Option<Task>, GenflowError> {
        let Some(task) = self.task_repo.find_by_id(task_id).await? else {
            return Ok(None);
        };
        let batches = self.batch_repo.find_many(&task.batch_ids).await?;

        let updated = self
            .task_repo
            .update(task_id, &|t: &mut Task| Ok(t.apply_batch_summary(&batches, now)))
            .await?;

        if let Some(updated) = &updated {
            if updated.status != task.status {
                info!(
                    task_id,
                    from = %task.status,
                    to = %updated.status,
                    processed = updated.processed_count,
                    failed = updated.failed_count,
                    "Task status changed"
                );
                counter!("tasks_status_changes_total", "status" => updated.status.to_string()).increment(1);
            }
            self.sync_index(updated).await;
        }
        Ok(updated)
    }

    /// 检查并恢复卡住的任务
    ///
    /// 超过阈值没有进展的 scheduled/processing 任务会重新派发最早的未完成批次。
    /// 每个卡住状态只处理一次：标记键去重，并把 last_progress_at 推到当前时间。
    pub async fn check_and_recover_stuck_tasks(&self, now: DateTime<Utc>) -> Result<RecoveryReport, GenflowError> {
        let threshold = chrono::Duration::milliseconds(self.config.stuck_threshold.as_millis() as i64);
        let mut report = RecoveryReport::default();

        let candidates = self
            .active_tasks(&[TaskStatus::Scheduled, TaskStatus::Processing])
            .await?;

        for task in candidates {
            let reference = [task.last_progress_at, task.scheduled_at]
                .into_iter()
                .flatten()
                .max()
                .unwrap_or(task.created_at);
            if now - reference < threshold {
                continue;
            }
            report.stuck += 1;

            let marker = format!(
                "{}:marker:stuck:{}:{}",
                self.config.key_prefix,
                task.id,
                reference.timestamp_millis()
            );
            if !self
                .markers
                .set_if_absent(&marker, &now.to_rfc3339(), self.config.stuck_threshold)
                .await?
            {
                report.already_handled += 1;
                continue;
            }

            if let Err(e) = self.recover_task(&task, now).await {
                warn!(task_id = %task.id, error = %e, "Stuck task recovery incomplete, batch left pending");
            }
            report.recovered.push(task.id.clone());
            counter!("stuck_tasks_recovered_total").increment(1);
        }

        if !report.recovered.is_empty() {
            info!(recovered = report.recovered.len(), "Recovered stuck tasks");
        }
        Ok(report)
    }

    async fn recover_task(&self, task: &Task, now: DateTime<Utc>) -> Result<(), GenflowError> {
        self.task_repo
            .update(&task.id, &|t: &mut Task| {
                if t.status.is_terminal() {
                    return Ok(false);
                }
                t.last_progress_at = Some(now);
                t.updated_at = now;
                Ok(true)
            })
            .await?;

        let mut batches = self.batch_repo.find_many(&task.batch_ids).await?;
        batches.sort_by_key(|b| b.index);
        let Some(batch) = batches.into_iter().find(|b| !b.status.is_terminal()) else {
            self.refresh_task(&task.id, now).await?;
            return Ok(());
        };

        info!(task_id = %task.id, batch_id = %batch.batch_id, "Re-dispatching stuck batch");
        if let Some(generation_id) = &batch.generation_id {
            self.polling.mark_generation_complete(generation_id).await?;
        }
        self.batch_repo
            .update(&batch.batch_id, &|b: &mut Batch| {
                if b.status.is_terminal() {
                    return Ok(false);
                }
                b.reset_to_pending(false, now);
                Ok(true)
            })
            .await?;

        self.dispatch_batch(&batch.batch_id, now).await?;
        Ok(())
    }

    /// 运维重试：failed/cancelled → pending，未完成的批次重新排队派发
    ///
    /// # 返回值
    ///
    /// * `Ok(Task)` - 重置后的任务
    /// * `Err(GenflowError::InvalidStateTransition)` - 任务不处于可重试状态
    pub async fn schedule_next_batch(&self, task_id: &str, now: DateTime<Utc>) -> Result<Task, GenflowError> {
        let task = self
            .task_repo
            .find_by_id(task_id)
            .await?
            .ok_or_else(|| GenflowError::NotFound(format!("task {}", task_id)))?;
        if !task.status.is_retryable() {
            return Err(GenflowError::InvalidStateTransition(format!(
                "cannot retry task {} in status {}",
                task_id, task.status
            )));
        }

        for batch in self.batch_repo.find_many(&task.batch_ids).await? {
            if batch.status == BatchStatus::Completed {
                continue;
            }
            if let Some(generation_id) = &batch.generation_id {
                self.polling.mark_generation_complete(generation_id).await?;
            }
            self.batch_repo
                .update(&batch.batch_id, &|b: &mut Batch| {
                    if b.status == BatchStatus::Completed {
                        return Ok(false);
                    }
                    b.reset_to_pending(true, now);
                    Ok(true)
                })
                .await?;
        }

        let batches = self.batch_repo.find_many(&task.batch_ids).await?;
        let updated = self
            .task_repo
            .update(task_id, &|t: &mut Task| {
                t.reset_for_retry(now)?;
                t.recount(&batches);
                Ok(true)
            })
            .await?
            .ok_or_else(|| GenflowError::NotFound(format!("task {}", task_id)))?;

        info!(task_id, pending_batches = batches.iter().filter(|b| b.status == BatchStatus::Pending).count(), "Task re-queued for dispatch");
        self.sync_index(&updated).await;
        Ok(updated)
    }

    /// 取消任务
    ///
    /// 取消所有未终结的批次并移除其轮询订阅；已终结的任务保持不变
    pub async fn cancel_task(&self, task_id: &str, now: DateTime<Utc>) -> Result<Task, GenflowError> {
        let task = self
            .task_repo
            .update(task_id, &|t: &mut Task| Ok(t.cancel(now)))
            .await?
            .ok_or_else(|| GenflowError::NotFound(format!("task {}", task_id)))?;

        if task.status != TaskStatus::Cancelled {
            debug!(task_id, status = %task.status, "Cancel ignored for finished task");
            return Ok(task);
        }

        for batch_id in &task.batch_ids {
            let cancelled = self
                .batch_repo
                .update(batch_id, &|b: &mut Batch| Ok(b.cancel(now)))
                .await?;
            if let Some(generation_id) = cancelled.and_then(|b| b.generation_id) {
                self.polling.mark_generation_complete(&generation_id).await?;
            }
        }
        self.polling.remove_for_task(task_id).await?;

        info!(task_id, "Task cancelled");
        Ok(self.refresh_task(task_id, now).await?.unwrap_or(task))
    }

    /// 轮询耗尽：批次与任务均以失败终止
    pub async fn fail_exhausted(&self, entry: &PollQueueEntry, reason: &str, now: DateTime<Utc>) -> Result<(), GenflowError> {
        self.batch_repo
            .update(&entry.batch_id, &|b: &mut Batch| Ok(b.fail_with(reason, now)))
            .await?;
        let failed = self
            .task_repo
            .update(&entry.task_id, &|t: &mut Task| Ok(t.fail_with(reason, now)))
            .await?;
        self.polling.remove_for_task(&entry.task_id).await?;

        if let Some(task) = failed {
            error!(task_id = %task.id, reason, "Task failed");
            self.refresh_task(&task.id, now).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PollResultHandler for BatchManager {
    async fn should_poll(&self, entry: &PollQueueEntry) -> Result<bool, GenflowError> {
        self.still_polling(&entry.task_id, &entry.batch_id, &entry.generation_id)
            .await
    }

    async fn on_update(
        &self,
        entry: &PollQueueEntry,
        update: &GenerationUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool, GenflowError> {
        let batch = self.apply_remote_result(&entry.batch_id, update, now).await?;
        Ok(batch.is_none_or(|b| b.status.is_terminal()))
    }

    async fn on_exhausted(
        &self,
        entry: &PollQueueEntry,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GenflowError> {
        self.fail_exhausted(entry, reason, now).await
    }
}
