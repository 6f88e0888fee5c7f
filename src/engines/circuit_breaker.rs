// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::repositories::record_store::{JsonRecords, StoreError};

/// 熔断器配置
#[derive(Clone, Debug)]
pub struct CircuitConfig {
    /// 失败阈值
    pub failure_threshold: u32,
    /// 打开后的冷却时间
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// 熔断器持久化状态
///
/// 每个资源名一条记录，由所有调用方通过记录存储共享
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CircuitState {
    pub name: String,
    pub is_open: bool,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub cooldown_seconds: u64,
    pub failure_threshold: u32,
}

impl CircuitState {
    fn closed(name: &str, config: &CircuitConfig) -> Self {
        Self {
            name: name.to_string(),
            is_open: false,
            consecutive_failures: 0,
            opened_at: None,
            cooldown_seconds: config.cooldown.as_secs(),
            failure_threshold: config.failure_threshold,
        }
    }

    fn retry_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
            .map(|at| at + chrono::Duration::seconds(self.cooldown_seconds as i64))
    }

    /// 打开且仍在冷却期内
    fn is_blocking(&self, now: DateTime<Utc>) -> bool {
        self.is_open && self.retry_at().is_some_and(|at| now < at)
    }

    /// 根据冷却时间推导三态
    pub fn status_at(&self, now: DateTime<Utc>) -> Status {
        if !self.is_open {
            Status::Closed
        } else if self.is_blocking(now) {
            Status::Open
        } else {
            Status::HalfOpen
        }
    }

    pub fn time_until_retry(&self, now: DateTime<Utc>) -> u64 {
        match self.retry_at() {
            Some(at) if self.is_open && at > now => (at - now).num_seconds().max(0) as u64,
            _ => 0,
        }
    }
}

/// 熔断器状态枚举
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// 关闭状态
    Closed,
    /// 打开状态
    Open,
    /// 半开状态
    HalfOpen,
}

/// 熔断器状态快照
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CircuitStatus {
    pub name: String,
    pub is_open: bool,
    pub status: Status,
    pub time_until_retry: u64,
    pub failures: u32,
}

impl CircuitStatus {
    fn from_state(state: &CircuitState, now: DateTime<Utc>) -> Self {
        Self {
            name: state.name.clone(),
            is_open: state.is_blocking(now),
            status: state.status_at(now),
            time_until_retry: state.time_until_retry(now),
            failures: state.consecutive_failures,
        }
    }

    fn closed(name: &str) -> Self {
        Self {
            name: name.to_string(),
            is_open: false,
            status: Status::Closed,
            time_until_retry: 0,
            failures: 0,
        }
    }
}

/// 多个资源的聚合状态
#[derive(Clone, Debug, Serialize)]
pub struct AggregateStatus {
    pub is_open: bool,
    pub status: Status,
    pub time_until_retry: u64,
    pub failures: u32,
    pub resources: Vec<CircuitStatus>,
}

/// 熔断器
///
/// 按资源名隔离的失败计数器，状态保存在记录存储中，
/// 因此并发的调度触发、运维请求看到的是同一个熔断器。
#[derive(Clone)]
pub struct CircuitBreaker {
    records: JsonRecords,
    key_prefix: String,
    state_ttl: Duration,
    /// 资源级配置覆盖
    configs: Arc<DashMap<String, CircuitConfig>>,
    /// 默认配置
    default_config: CircuitConfig,
}

impl CircuitBreaker {
    /// 创建熔断器
    ///
    /// # 参数
    ///
    /// * `records` - 类型化记录存储
    /// * `key_prefix` - 键前缀
    /// * `default_config` - 默认配置
    /// * `state_ttl` - 状态记录保留时间
    pub fn new(
        records: JsonRecords,
        key_prefix: &str,
        default_config: CircuitConfig,
        state_ttl: Duration,
    ) -> Self {
        Self {
            records,
            key_prefix: key_prefix.to_string(),
            state_ttl,
            configs: Arc::new(DashMap::new()),
            default_config,
        }
    }

    /// 设置资源配置
    ///
    /// # 参数
    ///
    /// * `resource` - 资源名称
    /// * `config` - 配置
    pub fn set_config(&self, resource: &str, config: CircuitConfig) {
        self.configs.insert(resource.to_string(), config);
    }

    fn get_config(&self, resource: &str) -> CircuitConfig {
        self.configs
            .get(resource)
            .map(|c| c.clone())
            .unwrap_or_else(|| self.default_config.clone())
    }

    fn key(&self, resource: &str) -> String {
        format!("{}:circuit:{}", self.key_prefix, resource)
    }

    async fn load(&self, resource: &str) -> Result<Option<CircuitState>, StoreError> {
        self.records.get(&self.key(resource)).await
    }

    /// 检查是否允许调用
    pub async fn allow(&self, resource: &str) -> Result<bool, StoreError> {
        self.allow_at(resource, Utc::now()).await
    }

    /// 检查是否允许调用
    ///
    /// 冷却期内返回 false；冷却结束后放行，下一次调用即为半开探测
    ///
    /// # 参数
    ///
    /// * `resource` - 资源名称
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// * `Ok(true)` - 允许调用
    /// * `Ok(false)` - 熔断器打开
    /// * `Err(StoreError)` - 存储不可用
    pub async fn allow_at(&self, resource: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let Some(state) = self.load(resource).await? else {
            return Ok(true);
        };

        let status = state.status_at(now);
        update_status_metric(resource, status);
        if status == Status::Open {
            counter!("circuit_breaker_rejected_total", "resource" => resource.to_string())
                .increment(1);
            return Ok(false);
        }
        Ok(true)
    }

    /// 记录成功
    pub async fn record_success(&self, resource: &str) -> Result<(), StoreError> {
        self.record_success_at(resource, Utc::now()).await
    }

    /// 记录成功：清零连续失败并关闭熔断器
    ///
    /// # 参数
    ///
    /// * `resource` - 资源名称
    /// * `now` - 当前时间
    pub async fn record_success_at(
        &self,
        resource: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        counter!("circuit_breaker_successes_total", "resource" => resource.to_string())
            .increment(1);

        let config = self.get_config(resource);
        let updated = self
            .records
            .upsert::<CircuitState, _>(&self.key(resource), self.state_ttl, |current| {
                let state = current?;
                if !state.is_open && state.consecutive_failures == 0 {
                    return None;
                }
                Some(CircuitState::closed(resource, &config))
            })
            .await?;

        if updated.is_some() {
            info!(resource, %now, "Circuit breaker closed after successful call");
            update_status_metric(resource, Status::Closed);
        }
        Ok(())
    }

    /// 记录失败
    pub async fn record_failure(&self, resource: &str) -> Result<CircuitStatus, StoreError> {
        self.record_failure_at(resource, Utc::now()).await
    }

    /// 记录失败：连续失败达到阈值时打开熔断器
    ///
    /// 已处于冷却期内的熔断器不会延长冷却；半开探测失败会重新打开。
    ///
    /// # 参数
    ///
    /// * `resource` - 资源名称
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// 记录后的状态快照
    pub async fn record_failure_at(
        &self,
        resource: &str,
        now: DateTime<Utc>,
    ) -> Result<CircuitStatus, StoreError> {
        counter!("circuit_breaker_failures_total", "resource" => resource.to_string())
            .increment(1);

        let config = self.get_config(resource);
        let state = self
            .records
            .upsert::<CircuitState, _>(&self.key(resource), self.state_ttl, |current| {
                let mut state = current.unwrap_or_else(|| CircuitState::closed(resource, &config));
                state.failure_threshold = config.failure_threshold;
                state.cooldown_seconds = config.cooldown.as_secs();
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);

                if state.consecutive_failures >= state.failure_threshold && !state.is_blocking(now)
                {
                    state.is_open = true;
                    state.opened_at = Some(now);
                }
                Some(state)
            })
            .await?
            .unwrap_or_else(|| CircuitState::closed(resource, &config));

        let status = CircuitStatus::from_state(&state, now);
        if status.is_open && state.opened_at == Some(now) {
            warn!(
                resource,
                failures = state.consecutive_failures,
                cooldown_secs = state.cooldown_seconds,
                "Circuit breaker opened"
            );
        }
        update_status_metric(resource, status.status);
        Ok(status)
    }

    /// 获取状态快照
    pub async fn get_status(&self, resource: &str) -> Result<CircuitStatus, StoreError> {
        self.get_status_at(resource, Utc::now()).await
    }

    /// 获取状态快照（只读）
    pub async fn get_status_at(
        &self,
        resource: &str,
        now: DateTime<Utc>,
    ) -> Result<CircuitStatus, StoreError> {
        Ok(match self.load(resource).await? {
            Some(state) => CircuitStatus::from_state(&state, now),
            None => CircuitStatus::closed(resource),
        })
    }

    /// 运维强制重置：无条件关闭并清零
    pub async fn force_reset(&self, resource: &str) -> Result<CircuitStatus, StoreError> {
        let state = CircuitState::closed(resource, &self.get_config(resource));
        self.records
            .put(&self.key(resource), &state, self.state_ttl)
            .await?;
        info!(resource, "Circuit breaker force reset");
        update_status_metric(resource, Status::Closed);
        Ok(CircuitStatus::closed(resource))
    }

    /// 聚合多个资源的状态
    ///
    /// `is_open` 取逻辑或，`time_until_retry` 与 `failures` 取最大值
    pub async fn aggregate_status(
        &self,
        resources: &[String],
        now: DateTime<Utc>,
    ) -> Result<AggregateStatus, StoreError> {
        let mut statuses = Vec::with_capacity(resources.len());
        for resource in resources {
            statuses.push(self.get_status_at(resource, now).await?);
        }

        let status = if statuses.iter().any(|s| s.status == Status::Open) {
            Status::Open
        } else if statuses.iter().any(|s| s.status == Status::HalfOpen) {
            Status::HalfOpen
        } else {
            Status::Closed
        };

        Ok(AggregateStatus {
            is_open: statuses.iter().any(|s| s.is_open),
            status,
            time_until_retry: statuses.iter().map(|s| s.time_until_retry).max().unwrap_or(0),
            failures: statuses.iter().map(|s| s.failures).max().unwrap_or(0),
            resources: statuses,
        })
    }
}

/// 更新状态指标
///
/// # 参数
///
/// * `resource` - 资源名称
/// * `status` - 状态
fn update_status_metric(resource: &str, status: Status) {
    let val = match status {
        Status::Closed => 0.0,
        Status::Open => 1.0,
        Status::HalfOpen => 0.5,
    };
    gauge!("circuit_breaker_status", "resource" => resource.to_string()).set(val);
}
