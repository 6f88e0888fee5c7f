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

use crate::domain::models::task::Task;
use crate::domain::repositories::record_store::JsonRecords;
use crate::domain::repositories::task_repository::{
    RepositoryError, TaskMutation, TaskRepository,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// 任务仓库实现
///
/// 基于记录存储实现的任务数据访问层，键为 `{prefix}:task:{id}`
#[derive(Clone)]
pub struct TaskRepositoryImpl {
    records: JsonRecords,
    key_prefix: String,
    /// 任务保留时间
    retention: Duration,
}

impl TaskRepositoryImpl {
    /// 创建新的任务仓库实例
    ///
    /// # 参数
    ///
    /// * `records` - 类型化记录存储
    /// * `key_prefix` - 键前缀
    /// * `retention` - 记录保留时间
    ///
    /// # 返回值
    ///
    /// 返回新的任务仓库实例
    pub fn new(records: JsonRecords, key_prefix: &str, retention: Duration) -> Self {
        Self {
            records,
            key_prefix: key_prefix.to_string(),
            retention,
        }
    }

    fn scan_prefix(&self) -> String {
        format!("{}:task:", self.key_prefix)
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.scan_prefix(), id)
    }
}

#[async_trait]
impl TaskRepository for TaskRepositoryImpl {
    async fn create(&self, task: &Task) -> Result<bool, RepositoryError> {
        Ok(self
            .records
            .insert_new(&self.key(&task.id), task, self.retention)
            .await?)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, RepositoryError> {
        Ok(self.records.get(&self.key(id)).await?)
    }

    async fn update(
        &self,
        id: &str,
        mutate: TaskMutation<'_>,
    ) -> Result<Option<Task>, RepositoryError> {
        self.records
            .update::<Task, RepositoryError, _>(&self.key(id), self.retention, |task| {
                mutate(task).map_err(RepositoryError::from)
            })
            .await
    }

    async fn exists(&self, id: &str) -> Result<bool, RepositoryError> {
        Ok(self.records.store().get(&self.key(id)).await?.is_some())
    }

    async fn list_all(&self) -> Result<Vec<Task>, RepositoryError> {
        let keys = self.records.store().keys_with_prefix(&self.scan_prefix()).await?;
        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            match self.records.get::<Task>(&key).await {
                Ok(Some(task)) => tasks.push(task),
                Ok(None) => {}
                // 单条损坏的记录不应阻断整个扫描
                Err(e) => warn!(key, error = %e, "Skipping undecodable task record"),
            }
        }
        Ok(tasks)
    }
}
