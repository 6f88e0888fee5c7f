// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::models::generation::GenerationUpdate;
use crate::domain::models::poll_entry::PollQueueEntry;
use crate::domain::repositories::record_store::{JsonRecords, StoreError};
use crate::engines::circuit_breaker::CircuitBreaker;
use crate::engines::traits::{ClientError, GenerationClient};
use crate::utils::errors::GenflowError;
use crate::utils::retry_policy::RetryPolicy;

/// 轮询耗尽时写入任务的失败原因
pub const POLLING_EXHAUSTED: &str = "polling exhausted";

/// 轮询队列配置
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// 非终态结果之后的轮询间隔
    pub interval: Duration,
    /// 连续失败超过该值即放弃
    pub max_attempts: u32,
    /// 失败退避
    pub backoff: RetryPolicy,
    /// 单次 tick 最多轮询条数
    pub max_per_tick: usize,
    /// 并发轮询数
    pub concurrency: usize,
    /// 单次轮询的占用时间，防止重叠的 tick 同时轮询同一生成
    pub claim_ttl: Duration,
    /// 订阅记录保留时间
    pub retention: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_attempts: 20,
            backoff: RetryPolicy::exponential(20, Duration::from_secs(30), Duration::from_secs(900)),
            max_per_tick: 50,
            concurrency: 4,
            claim_ttl: Duration::from_secs(60),
            retention: Duration::from_secs(86400),
        }
    }
}

/// 轮询结果的接收方
///
/// 队列只负责选择与退避，结果如何落到批次/任务记录由接收方决定
#[async_trait]
pub trait PollResultHandler: Send + Sync {
    /// 订阅所属任务是否仍需轮询
    async fn should_poll(&self, entry: &PollQueueEntry) -> Result<bool, GenflowError>;

    /// 处理一次成功的轮询，返回生成是否已结束
    async fn on_update(
        &self,
        entry: &PollQueueEntry,
        update: &GenerationUpdate,
        now: DateTime<Utc>,
    ) -> Result<bool, GenflowError>;

    /// 轮询次数耗尽
    async fn on_exhausted(
        &self,
        entry: &PollQueueEntry,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), GenflowError>;
}

/// 单条轮询的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    /// 收到非终态进度，按正常间隔继续
    Progress,
    /// 生成结束，订阅已移除
    Completed,
    /// 轮询失败，已按退避重新安排
    Failed { attempt_count: u32, error: String },
    /// 失败次数耗尽，订阅已移除
    Exhausted,
    /// 本次未轮询
    Skipped { reason: String },
    /// 所属任务已不再活跃，订阅已移除
    Removed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub generation_id: String,
    pub task_id: String,
    pub batch_id: String,
    #[serde(flatten)]
    pub outcome: PollOutcome,
}

/// 集中式轮询队列
///
/// 每个 generation_id 一条记录 `{prefix}:poll:{generation_id}`，
/// 去重由记录键保证，合并通过 CAS 完成
pub struct PollingQueue {
    records: JsonRecords,
    key_prefix: String,
    client: Arc<dyn GenerationClient>,
    breaker: CircuitBreaker,
    resource: String,
    config: PollingConfig,
}

impl PollingQueue {
    /// 创建轮询队列
    ///
    /// # 参数
    ///
    /// * `records` - 类型化记录存储
    /// * `key_prefix` - 键前缀
    /// * `client` - 远端生成服务客户端
    /// * `breaker` - 熔断器
    /// * `resource` - 熔断资源名
    /// * `config` - 队列配置
    pub fn new(
        records: JsonRecords,
        key_prefix: &str,
        client: Arc<dyn GenerationClient>,
        breaker: CircuitBreaker,
        resource: &str,
        config: PollingConfig,
    ) -> Self {
        Self {
            records,
            key_prefix: key_prefix.to_string(),
            client,
            breaker,
            resource: resource.to_string(),
            config,
        }
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    fn scan_prefix(&self) -> String {
        format!("{}:poll:", self.key_prefix)
    }

    fn key(&self, generation_id: &str) -> String {
        format!("{}{}", self.scan_prefix(), generation_id)
    }

    fn claim_key(&self, generation_id: &str) -> String {
        format!("{}:marker:poll:{}", self.key_prefix, generation_id)
    }

    /// 首次轮询时间
    pub fn first_poll_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::milliseconds(self.config.interval.as_millis() as i64)
    }

    /// 插入或合并订阅
    ///
    /// 已存在时优先级取两者中更紧急的，尝试次数与下次轮询时间保留
    ///
    /// # 返回值
    ///
    /// 合并后的订阅
    pub async fn enqueue(&self, entry: PollQueueEntry) -> Result<PollQueueEntry, StoreError> {
        let key = self.key(&entry.generation_id);
        let merged = self
            .records
            .upsert::<PollQueueEntry, _>(&key, self.config.retention, |current| {
                Some(match current {
                    Some(mut existing) => {
                        existing.merge_priority(entry.priority);
                        existing
                    }
                    None => entry.clone(),
                })
            })
            .await?
            .unwrap_or_else(|| entry.clone());

        debug!(
            generation_id = %merged.generation_id,
            task_id = %merged.task_id,
            priority = merged.priority,
            "Generation enqueued for polling"
        );
        Ok(merged)
    }

    /// 移除订阅，不存在时为空操作
    pub async fn mark_generation_complete(&self, generation_id: &str) -> Result<bool, StoreError> {
        let removed = self.records.delete(&self.key(generation_id)).await?;
        if removed {
            debug!(generation_id, "Generation removed from polling queue");
        }
        Ok(removed)
    }

    pub async fn get(&self, generation_id: &str) -> Result<Option<PollQueueEntry>, StoreError> {
        self.records.get(&self.key(generation_id)).await
    }

    /// 当前全部订阅，按调度顺序排列
    pub async fn entries(&self) -> Result<Vec<PollQueueEntry>, StoreError> {
        let keys = self.records.store().keys_with_prefix(&self.scan_prefix()).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            match self.records.get::<PollQueueEntry>(&key).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(StoreError::Serialization(e)) => {
                    warn!(key, error = %e, "Dropping undecodable poll entry");
                    self.records.delete(&key).await?;
                }
                Err(e) => return Err(e),
            }
        }
        entries.sort_by(|a, b| a.schedule_order(b));
        Ok(entries)
    }

    pub async fn entries_for_task(&self, task_id: &str) -> Result<Vec<PollQueueEntry>, StoreError> {
        let mut entries = self.entries().await?;
        entries.retain(|e| e.task_id == task_id);
        Ok(entries)
    }

    /// 到期的订阅，优先级 → 尝试次数 → 入队时间
    pub async fn due_entries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<PollQueueEntry>, StoreError> {
        let mut entries = self.entries().await?;
        entries.retain(|e| e.is_due(now));
        entries.truncate(limit);
        Ok(entries)
    }

    /// 移除任务的全部订阅
    pub async fn remove_for_task(&self, task_id: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        for entry in self.entries_for_task(task_id).await? {
            if self.mark_generation_complete(&entry.generation_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// 将任务的订阅提前到 `now`
    pub async fn expedite_task(&self, task_id: &str, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut expedited = 0;
        for entry in self.entries_for_task(task_id).await? {
            let updated = self
                .records
                .update::<PollQueueEntry, StoreError, _>(
                    &self.key(&entry.generation_id),
                    self.config.retention,
                    |e| {
                        if e.next_poll_at <= now {
                            return Ok(false);
                        }
                        e.next_poll_at = now;
                        Ok(true)
                    },
                )
                .await?;
            if updated.is_some() {
                expedited += 1;
            }
        }
        Ok(expedited)
    }

    /// 执行一次轮询调度
    ///
    /// 单条订阅的失败只记录在订阅上，不会中断本次 tick 的其它订阅
    ///
    /// # 参数
    ///
    /// * `now` - 当前时间
    /// * `handler` - 结果接收方
    ///
    /// # 返回值
    ///
    /// * `Ok(Vec<PollResult>)` - 每条被选中订阅的结果
    /// * `Err(StoreError)` - 无法读取队列
    pub async fn tick(
        &self,
        now: DateTime<Utc>,
        handler: &dyn PollResultHandler,
    ) -> Result<Vec<PollResult>, StoreError> {
        let due = self.due_entries(now, self.config.max_per_tick).await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = due.len(), "Polling due generations");
        Ok(self.poll_entries(due, now, handler).await)
    }

    /// 立即轮询指定任务的全部订阅，忽略 next_poll_at
    pub async fn poll_task(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
        handler: &dyn PollResultHandler,
    ) -> Result<Vec<PollResult>, StoreError> {
        let entries = self.entries_for_task(task_id).await?;
        Ok(self.poll_entries(entries, now, handler).await)
    }

    async fn poll_entries(
        &self,
        entries: Vec<PollQueueEntry>,
        now: DateTime<Utc>,
        handler: &dyn PollResultHandler,
    ) -> Vec<PollResult> {
        stream::iter(entries)
            .map(|entry| self.poll_entry(entry, now, handler))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    async fn poll_entry(
        &self,
        entry: PollQueueEntry,
        now: DateTime<Utc>,
        handler: &dyn PollResultHandler,
    ) -> PollResult {
        let outcome = match self.try_poll_entry(&entry, now, handler).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(generation_id = %entry.generation_id, error = %e, "Poll bookkeeping failed");
                PollOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        };
        counter!("polling_queue_polls_total", "outcome" => outcome_label(&outcome)).increment(1);

        PollResult {
            generation_id: entry.generation_id,
            task_id: entry.task_id,
            batch_id: entry.batch_id,
            outcome,
        }
    }

    async fn try_poll_entry(
        &self,
        entry: &PollQueueEntry,
        now: DateTime<Utc>,
        handler: &dyn PollResultHandler,
    ) -> Result<PollOutcome, GenflowError> {
        if !handler.should_poll(entry).await? {
            self.mark_generation_complete(&entry.generation_id).await?;
            return Ok(PollOutcome::Removed);
        }

        if !self.breaker.allow_at(&self.resource, now).await? {
            return Ok(PollOutcome::Skipped {
                reason: GenflowError::CircuitOpen {
                    resource: self.resource.clone(),
                }
                .to_string(),
            });
        }

        let claim_key = self.claim_key(&entry.generation_id);
        if !self
            .records
            .store()
            .set_if_absent(&claim_key, &now.to_rfc3339(), self.config.claim_ttl)
            .await?
        {
            return Ok(PollOutcome::Skipped {
                reason: "poll already in progress".to_string(),
            });
        }

        let outcome = self.fetch_and_route(entry, now, handler).await;
        self.records.store().delete(&claim_key).await?;
        outcome
    }

    async fn fetch_and_route(
        &self,
        entry: &PollQueueEntry,
        now: DateTime<Utc>,
        handler: &dyn PollResultHandler,
    ) -> Result<PollOutcome, GenflowError> {
        match self.client.fetch_updates(&entry.generation_id).await {
            Ok(update) => {
                self.breaker.record_success_at(&self.resource, now).await?;
                match handler.on_update(entry, &update, now).await {
                    Ok(true) => {
                        self.mark_generation_complete(&entry.generation_id).await?;
                        Ok(PollOutcome::Completed)
                    }
                    Ok(false) => {
                        self.reschedule(entry, now).await?;
                        Ok(PollOutcome::Progress)
                    }
                    Err(e) => self.record_poll_failure(entry, &e.to_string(), now, handler).await,
                }
            }
            Err(err) => {
                if err.trips_breaker() {
                    self.breaker.record_failure_at(&self.resource, now).await?;
                }
                let message = describe(&err);
                self.record_poll_failure(entry, &message, now, handler).await
            }
        }
    }

    async fn reschedule(&self, entry: &PollQueueEntry, now: DateTime<Utc>) -> Result<(), StoreError> {
        let next = self.first_poll_at(now);
        self.records
            .update::<PollQueueEntry, StoreError, _>(
                &self.key(&entry.generation_id),
                self.config.retention,
                |e| {
                    e.next_poll_at = next;
                    e.last_error = None;
                    Ok(true)
                },
            )
            .await?;
        Ok(())
    }

    async fn record_poll_failure(
        &self,
        entry: &PollQueueEntry,
        error: &str,
        now: DateTime<Utc>,
        handler: &dyn PollResultHandler,
    ) -> Result<PollOutcome, GenflowError> {
        let backoff = &self.config.backoff;
        let updated = self
            .records
            .update::<PollQueueEntry, StoreError, _>(
                &self.key(&entry.generation_id),
                self.config.retention,
                |e| {
                    e.attempt_count += 1;
                    e.next_poll_at = backoff.next_retry_time(e.attempt_count, now);
                    e.last_error = Some(error.to_string());
                    Ok(true)
                },
            )
            .await?;

        let Some(updated) = updated else {
            // 订阅已被取消或完成
            return Ok(PollOutcome::Removed);
        };

        if updated.attempt_count > self.config.max_attempts {
            warn!(
                generation_id = %updated.generation_id,
                task_id = %updated.task_id,
                attempts = updated.attempt_count,
                "Polling exhausted"
            );
            self.mark_generation_complete(&updated.generation_id).await?;
            handler.on_exhausted(&updated, POLLING_EXHAUSTED, now).await?;
            return Ok(PollOutcome::Exhausted);
        }

        info!(
            generation_id = %updated.generation_id,
            attempt = updated.attempt_count,
            next_poll_at = %updated.next_poll_at,
            error,
            "Poll failed, backing off"
        );
        Ok(PollOutcome::Failed {
            attempt_count: updated.attempt_count,
            error: error.to_string(),
        })
    }
}

fn describe(err: &ClientError) -> String {
    match err {
        ClientError::Authentication(_) => format!("authentication error: {}", err),
        _ => err.to_string(),
    }
}

fn outcome_label(outcome: &PollOutcome) -> &'static str {
    match outcome {
        PollOutcome::Progress => "progress",
        PollOutcome::Completed => "completed",
        PollOutcome::Failed { .. } => "failed",
        PollOutcome::Exhausted => "exhausted",
        PollOutcome::Skipped { .. } => "skipped",
        PollOutcome::Removed => "removed",
    }
}
