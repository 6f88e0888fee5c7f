// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// 记录存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    /// 后端不可用
    #[error("Store backend error: {0}")]
    Backend(String),

    /// 记录无法编解码
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 乐观更新在重试上限内仍未成功
    #[error("Concurrent update conflict on {0}")]
    Conflict(String),
}

/// 带过期时间的键值记录存储
///
/// 所有跨调用方的协调都通过单键原子操作完成，没有跨键事务。
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 读取键值，过期或不存在时返回 None
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// 写入键值并设置过期时间
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// 删除键，键不存在时返回 false
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// 比较并交换
    ///
    /// `expected` 为 None 表示仅在键不存在时写入
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&str>,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// 仅在键不存在时写入，用于去重与冷却标记
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// 原子增加计数器并刷新过期时间
    async fn incr_by(&self, key: &str, delta: i64, ttl: Duration) -> Result<i64, StoreError>;

    /// 列出指定前缀的所有键（O(n)，仅用于重建、回退扫描与清理）
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// 物理删除已过期的记录，返回删除数量
    ///
    /// 由后端自行淘汰过期键时返回 0
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

/// 基于 JSON 的类型化记录访问
///
/// 在 [`RecordStore`] 之上提供序列化与乐观并发更新（读取 → 修改 → CAS，冲突时重试）
#[derive(Clone)]
pub struct JsonRecords {
    store: Arc<dyn RecordStore>,
    max_retries: u32,
}

impl JsonRecords {
    pub fn new(store: Arc<dyn RecordStore>, max_retries: u32) -> Self {
        Self {
            store,
            max_retries: max_retries.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.store.set(key, &raw, ttl).await
    }

    /// 仅在记录不存在时创建
    pub async fn insert_new<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let raw = serde_json::to_string(value)?;
        self.store.compare_and_set(key, None, &raw, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.store.delete(key).await
    }

    /// 乐观更新已有记录
    ///
    /// `mutate` 返回 `Ok(false)` 表示无需写入。记录不存在时返回 `Ok(None)`。
    /// `mutate` 可能因冲突被调用多次，必须只依赖传入的记录。
    pub async fn update<T, E, F>(&self, key: &str, ttl: Duration, mut mutate: F) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned + Send,
        E: From<StoreError>,
        F: FnMut(&mut T) -> Result<bool, E> + Send,
    {
        for attempt in 0..self.max_retries {
            let Some(raw) = self.store.get(key).await? else {
                return Ok(None);
            };
            let mut value: T = serde_json::from_str(&raw).map_err(StoreError::from)?;
            if !mutate(&mut value)? {
                return Ok(Some(value));
            }
            let new_raw = serde_json::to_string(&value).map_err(StoreError::from)?;
            if self
                .store
                .compare_and_set(key, Some(&raw), &new_raw, ttl)
                .await?
            {
                return Ok(Some(value));
            }
            debug!(key, attempt, "CAS conflict, retrying update");
        }
        Err(StoreError::Conflict(key.to_string()).into())
    }

    /// 乐观地插入或更新记录
    ///
    /// `merge` 接收当前记录（可能不存在），返回 None 表示放弃写入。
    pub async fn upsert<T, F>(&self, key: &str, ttl: Duration, mut merge: F) -> Result<Option<T>, StoreError>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnMut(Option<T>) -> Option<T> + Send,
    {
        for attempt in 0..self.max_retries {
            let raw = self.store.get(key).await?;
            let current = match &raw {
                Some(r) => Some(serde_json::from_str::<T>(r)?),
                None => None,
            };
            let Some(next) = merge(current) else {
                return Ok(None);
            };
            let new_raw = serde_json::to_string(&next)?;
            if raw.as_deref() == Some(new_raw.as_str()) {
                return Ok(Some(next));
            }
            if self
                .store
                .compare_and_set(key, raw.as_deref(), &new_raw, ttl)
                .await?
            {
                return Ok(Some(next));
            }
            debug!(key, attempt, "CAS conflict, retrying upsert");
        }
        Err(StoreError::Conflict(key.to_string()))
    }
}
