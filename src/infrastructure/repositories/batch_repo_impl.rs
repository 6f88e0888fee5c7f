// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::domain::models::batch::Batch;
use crate::domain::repositories::record_store::JsonRecords;
use crate::domain::repositories::task_repository::{
    BatchMutation, BatchRepository, RepositoryError,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// 批次仓库实现，键为 `{prefix}:batch:{batch_id}`
#[derive(Clone)]
pub struct BatchRepositoryImpl {
    records: JsonRecords,
    key_prefix: String,
    retention: Duration,
}

impl BatchRepositoryImpl {
    pub fn new(records: JsonRecords, key_prefix: &str, retention: Duration) -> Self {
        Self {
            records,
            key_prefix: key_prefix.to_string(),
            retention,
        }
    }

    fn scan_prefix(&self) -> String {
        format!("{}:batch:", self.key_prefix)
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.scan_prefix(), id)
    }
}

#[async_trait]
impl BatchRepository for BatchRepositoryImpl {
    async fn create(&self, batch: &Batch) -> Result<bool, RepositoryError> {
        Ok(self
            .records
            .insert_new(&self.key(&batch.batch_id), batch, self.retention)
            .await?)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Batch>, RepositoryError> {
        Ok(self.records.get(&self.key(id)).await?)
    }

    async fn find_many(&self, ids: &[String]) -> Result<Vec<Batch>, RepositoryError> {
        let mut batches = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(batch) = self.records.get::<Batch>(&self.key(id)).await? {
                batches.push(batch);
            }
        }
        Ok(batches)
    }

    async fn update(
        &self,
        id: &str,
        mutate: BatchMutation<'_>,
    ) -> Result<Option<Batch>, RepositoryError> {
        self.records
            .update::<Batch, RepositoryError, _>(&self.key(id), self.retention, |batch| {
                mutate(batch).map_err(RepositoryError::from)
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        Ok(self.records.delete(&self.key(id)).await?)
    }

    async fn list_all(&self) -> Result<Vec<Batch>, RepositoryError> {
        let keys = self.records.store().keys_with_prefix(&self.scan_prefix()).await?;
        let mut batches = Vec::with_capacity(keys.len());
        for key in keys {
            match self.records.get::<Batch>(&key).await {
                Ok(Some(batch)) => batches.push(batch),
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "Skipping undecodable batch record"),
            }
        }
        Ok(batches)
    }
}
