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

use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// 应用程序配置设置
///
/// 包含服务器、记录存储、远端服务、批处理、轮询、熔断与调度等所有配置项
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// 服务器配置
    pub server: ServerSettings,
    /// 记录存储配置
    pub storage: StorageSettings,
    /// Redis配置
    pub redis: RedisSettings,
    /// 远端生成服务配置
    pub remote: RemoteSettings,
    /// 批次切分配置
    pub batching: BatchingSettings,
    /// 轮询队列配置
    pub polling: PollingSettings,
    /// 熔断器配置
    pub circuit_breaker: CircuitBreakerSettings,
    /// 调度配置
    pub scheduler: SchedulerSettings,
    /// 维护任务配置
    pub maintenance: MaintenanceSettings,
    /// 任务配置
    pub tasks: TaskSettings,
    /// 指标配置
    pub metrics: MetricsSettings,
}

/// 服务器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// 服务器监听主机地址
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
}

/// 记录存储配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// 存储后端 (redis, memory)
    pub backend: String,
    /// 键前缀
    pub key_prefix: String,
    /// 乐观更新最大重试次数
    pub max_cas_retries: u32,
}

/// Redis配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    /// Redis连接URL
    pub url: String,
}

/// 远端生成服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSettings {
    /// 服务根地址
    pub base_url: String,
    /// API 密钥
    pub api_key: Option<String>,
    /// 单次请求超时（秒）
    pub timeout_secs: u64,
    /// 熔断器资源名
    pub resource_name: String,
}

/// 批次切分配置
#[derive(Debug, Clone, Deserialize)]
pub struct BatchingSettings {
    /// 每批文档数
    pub batch_size: usize,
    /// 派发最大重试次数
    pub max_dispatch_attempts: u32,
    /// 派发重试初始退避（秒）
    pub retry_initial_backoff_secs: u64,
    /// 派发重试最大退避（秒）
    pub retry_max_backoff_secs: u64,
}

/// 轮询队列配置
#[derive(Debug, Clone, Deserialize)]
pub struct PollingSettings {
    /// 正常轮询间隔（秒）
    pub interval_secs: u64,
    /// 最大连续失败次数
    pub max_attempts: u32,
    /// 失败退避初始值（秒）
    pub backoff_initial_secs: u64,
    /// 失败退避上限（秒）
    pub backoff_max_secs: u64,
    /// 退避模式 (exponential, linear)
    pub backoff_mode: String,
    /// 单次 tick 最多轮询条数
    pub max_per_tick: usize,
    /// 并发轮询数
    pub concurrency: usize,
}

/// 资源级熔断覆盖
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitResourceSettings {
    pub failure_threshold: Option<u32>,
    pub cooldown_secs: Option<u64>,
}

/// 熔断器配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerSettings {
    /// 连续失败阈值
    pub failure_threshold: u32,
    /// 冷却时间（秒）
    pub cooldown_secs: u64,
    /// 状态记录保留时间（秒）
    pub state_ttl_secs: u64,
    /// 参与聚合展示的资源名
    pub resources: Vec<String>,
    /// 资源级覆盖
    #[serde(default)]
    pub overrides: HashMap<String, CircuitResourceSettings>,
}

/// 调度配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// tick 间隔（秒）
    pub tick_interval_secs: u64,
    /// 单次 tick 最多派发批次数
    pub max_dispatch_per_tick: usize,
    /// 无进展多久视为卡住（秒）
    pub stuck_threshold_secs: u64,
    /// RunNow 冷却时间（秒）
    pub run_now_cooldown_secs: u64,
}

/// 维护任务配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceSettings {
    /// 维护周期（秒）
    pub interval_secs: u64,
    /// 孤儿清理最小间隔（秒）
    pub cleanup_min_interval_secs: u64,
}

/// 任务配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct TaskSettings {
    /// 记录保留时间（秒）
    pub retention_secs: u64,
    /// 单个任务最大文档数
    pub max_documents: usize,
    /// 默认优先级
    pub default_priority: i32,
    /// 默认每页条数
    pub default_per_page: u32,
    /// 最大每页条数
    pub max_per_page: u32,
}

/// 指标配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// 是否启用 Prometheus 导出
    pub enabled: bool,
    /// 监听地址
    pub listen_addr: String,
}

impl TaskSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次加载默认值、`config/default.toml`、`config/{APP_ENVIRONMENT}.toml`
    /// 与 `GENFLOW__SECTION__KEY` 环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Self::defaults()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("GENFLOW")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("circuit_breaker.resources")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 仅使用内置默认值构建配置
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::defaults()?.build()?.try_deserialize()
    }

    fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("storage.backend", "redis")?
            .set_default("storage.key_prefix", "genflow")?
            .set_default("storage.max_cas_retries", 16)?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("remote.base_url", "http://127.0.0.1:8080/api/v1")?
            .set_default("remote.timeout_secs", 30)?
            .set_default("remote.resource_name", "remote_api")?
            .set_default("batching.batch_size", 10)?
            .set_default("batching.max_dispatch_attempts", 5)?
            .set_default("batching.retry_initial_backoff_secs", 30)?
            .set_default("batching.retry_max_backoff_secs", 600)?
            .set_default("polling.interval_secs", 30)?
            .set_default("polling.max_attempts", 20)?
            .set_default("polling.backoff_initial_secs", 30)?
            .set_default("polling.backoff_max_secs", 900)?
            .set_default("polling.backoff_mode", "exponential")?
            .set_default("polling.max_per_tick", 50)?
            .set_default("polling.concurrency", 4)?
            .set_default("circuit_breaker.failure_threshold", 5)?
            .set_default("circuit_breaker.cooldown_secs", 300)?
            .set_default("circuit_breaker.state_ttl_secs", 7 * 24 * 3600)?
            .set_default(
                "circuit_breaker.resources",
                vec!["remote_api".to_string(), "api".to_string()],
            )?
            .set_default("scheduler.tick_interval_secs", 60)?
            .set_default("scheduler.max_dispatch_per_tick", 20)?
            .set_default("scheduler.stuck_threshold_secs", 600)?
            .set_default("scheduler.run_now_cooldown_secs", 10)?
            .set_default("maintenance.interval_secs", 3600)?
            .set_default("maintenance.cleanup_min_interval_secs", 3600)?
            .set_default("tasks.retention_secs", 86400)?
            .set_default("tasks.max_documents", 1000)?
            .set_default("tasks.default_priority", 10)?
            .set_default("tasks.default_per_page", 20)?
            .set_default("tasks.max_per_page", 100)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.listen_addr", "0.0.0.0:9000")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_complete() {
        let settings = Settings::with_defaults().unwrap();

        assert_eq!(settings.storage.key_prefix, "genflow");
        assert_eq!(settings.tasks.retention(), Duration::from_secs(86400));
        assert_eq!(settings.remote.resource_name, "remote_api");
        assert_eq!(
            settings.circuit_breaker.resources,
            vec!["remote_api".to_string(), "api".to_string()]
        );
        assert!(settings.remote.api_key.is_none());
        assert!(settings.circuit_breaker.overrides.is_empty());
        assert!(settings.tasks.max_per_page >= settings.tasks.default_per_page);
    }
}
