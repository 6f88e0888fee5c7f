// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

use crate::domain::repositories::record_store::{RecordStore, StoreError};

/// 比较并交换脚本
///
/// ARGV[1] 为期望值（ARGV[3] == "1" 时表示期望键不存在），ARGV[2] 为新值，ARGV[4] 为过期秒数
const COMPARE_AND_SET_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if ARGV[3] == '1' then
    if current then
        return 0
    end
elseif current ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'EX', ARGV[4])
return 1
"#;

const SCAN_BATCH: usize = 500;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Redis记录存储
///
/// 使用多路复用连接；CAS 通过 Lua 脚本在服务端原子执行
#[derive(Clone)]
pub struct RedisRecordStore {
    connection: MultiplexedConnection,
    cas_script: redis::Script,
}

impl RedisRecordStore {
    /// 连接Redis
    ///
    /// # 参数
    ///
    /// * `redis_url` - Redis连接URL
    ///
    /// # 返回值
    ///
    /// * `Ok(RedisRecordStore)` - 记录存储实例
    /// * `Err(StoreError)` - 连接失败
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis record store");
        Ok(Self {
            connection,
            cas_script: redis::Script::new(COMPARE_AND_SET_SCRIPT),
        })
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

/// 转义 SCAN MATCH 模式中的通配符
fn escape_pattern(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('*');
    escaped
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut con = self.connection.clone();
        let value: Option<String> = con.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut con = self.connection.clone();
        con.set_ex::<_, _, ()>(key, value, Self::ttl_secs(ttl))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut con = self.connection.clone();
        let removed: i64 = con.del(key).await?;
        Ok(removed > 0)
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut con = self.connection.clone();
        let swapped: i64 = self
            .cas_script
            .key(key)
            .arg(expected.unwrap_or(""))
            .arg(value)
            .arg(if expected.is_none() { "1" } else { "0" })
            .arg(Self::ttl_secs(ttl))
            .invoke_async(&mut con)
            .await?;
        Ok(swapped == 1)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut con = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(Self::ttl_secs(ttl))
            .query_async(&mut con)
            .await?;
        Ok(reply.is_some())
    }

    async fn incr_by(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, StoreError> {
        let mut con = self.connection.clone();
        let (value, _): (i64, i64) = redis::pipe()
            .atomic()
            .incr(key, delta)
            .expire(key, Self::ttl_secs(ttl) as i64)
            .query_async(&mut con)
            .await?;
        Ok(value)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut con = self.connection.clone();
        let pattern = escape_pattern(prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut con)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    // 键带 EX，由 Redis 自行淘汰
    async fn purge_expired(&self) -> Result<usize, StoreError> {
        Ok(0)
    }
}
