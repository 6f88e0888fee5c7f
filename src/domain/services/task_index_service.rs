// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::models::index_entry::{newest_first, PageRequest, TaskFilter, TaskIndexEntry, TaskPage};
use crate::domain::models::task::{Task, TaskStatus};
use crate::domain::repositories::record_store::{JsonRecords, StoreError};
use crate::domain::repositories::task_repository::{BatchRepository, TaskRepository};
use crate::utils::errors::GenflowError;

/// 单个写入方跟随指针切换的最大次数
const MAX_GENERATION_HOPS: usize = 3;

/// 当前索引代的指针
///
/// 条目按代分别存放在 `{prefix}:task_index:{generation}:{task_id}`，
/// 每次更新只写一个小键。重建写完新一代后用 CAS 切换指针。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexGeneration {
    pub generation: i64,
    pub rebuilt_at: DateTime<Utc>,
}

/// 清理结果
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CleanupReport {
    /// 因限流跳过
    pub skipped: bool,
    pub removed_index_entries: usize,
    pub removed_batches: usize,
}

/// 索引统计
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexStats {
    pub generation: i64,
    pub entries: usize,
    pub rebuilt_at: DateTime<Utc>,
}

/// 任务索引服务
///
/// 维护 (状态, 创建时间) → 任务ID 的派生索引，只服务于分页列表。
/// 索引只是提示：缺失或不一致时返回 None，由调用方回退到全量扫描；
/// 调度器每轮用任务扫描结果补齐缺失或落后的条目。
pub struct TaskIndexService {
    records: JsonRecords,
    key_prefix: String,
    task_repo: Arc<dyn TaskRepository>,
    batch_repo: Arc<dyn BatchRepository>,
    index_ttl: Duration,
    cleanup_interval: Duration,
}

impl TaskIndexService {
    /// 创建索引服务
    ///
    /// # 参数
    ///
    /// * `records` - 类型化记录存储
    /// * `key_prefix` - 键前缀
    /// * `task_repo` - 任务仓库
    /// * `batch_repo` - 批次仓库
    /// * `index_ttl` - 索引记录保留时间
    /// * `cleanup_interval` - 孤儿清理最小间隔
    pub fn new(
        records: JsonRecords,
        key_prefix: &str,
        task_repo: Arc<dyn TaskRepository>,
        batch_repo: Arc<dyn BatchRepository>,
        index_ttl: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            records,
            key_prefix: key_prefix.to_string(),
            task_repo,
            batch_repo,
            index_ttl,
            cleanup_interval,
        }
    }

    fn pointer_key(&self) -> String {
        format!("{}:task_index", self.key_prefix)
    }

    fn sequence_key(&self) -> String {
        format!("{}:task_index:seq", self.key_prefix)
    }

    fn generation_prefix(&self, generation: i64) -> String {
        format!("{}:task_index:{}:", self.key_prefix, generation)
    }

    fn entry_key(&self, generation: i64, task_id: &str) -> String {
        format!("{}{}", self.generation_prefix(generation), task_id)
    }

    fn cleanup_marker_key(&self) -> String {
        format!("{}:marker:cleanup:index", self.key_prefix)
    }

    /// 读取当前代，损坏的指针视为不存在
    async fn current_generation(&self) -> Result<Option<IndexGeneration>, StoreError> {
        match self.records.get::<IndexGeneration>(&self.pointer_key()).await {
            Ok(generation) => Ok(generation),
            Err(StoreError::Serialization(e)) => {
                warn!(error = %e, "Task index pointer is corrupt, ignoring it");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 读取某一代的全部条目，跳过损坏与已过期的条目
    async fn load_entries(&self, generation: i64) -> Result<HashMap<String, TaskIndexEntry>, StoreError> {
        let prefix = self.generation_prefix(generation);
        let mut entries = HashMap::new();
        for key in self.records.store().keys_with_prefix(&prefix).await? {
            match self.records.get::<TaskIndexEntry>(&key).await {
                Ok(Some(entry)) => {
                    entries.insert(entry.task_id.clone(), entry);
                }
                Ok(None) => {}
                Err(StoreError::Serialization(e)) => {
                    warn!(key = %key, error = %e, "Skipping corrupt task index entry");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    /// 写入单个条目，已有条目不比它旧时保持不变
    async fn write_entry(&self, generation: i64, entry: &TaskIndexEntry) -> Result<bool, StoreError> {
        let key = self.entry_key(generation, &entry.task_id);
        let written = self
            .records
            .upsert::<TaskIndexEntry, _>(&key, self.index_ttl, |current| match current {
                Some(current) if current.updated_at > entry.updated_at || current == *entry => None,
                _ => Some(entry.clone()),
            })
            .await;

        match written {
            Ok(result) => Ok(result.is_some()),
            Err(StoreError::Serialization(e)) => {
                warn!(key = %key, error = %e, "Overwriting corrupt task index entry");
                self.records.put(&key, entry, self.index_ttl).await?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    async fn drop_generation(&self, generation: i64) -> Result<usize, StoreError> {
        let mut removed = 0;
        for key in self
            .records
            .store()
            .keys_with_prefix(&self.generation_prefix(generation))
            .await?
        {
            if self.records.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// 从任务记录全量重建索引
    ///
    /// # 返回值
    ///
    /// 索引条目数
    pub async fn rebuild_index(&self, now: DateTime<Utc>) -> Result<usize, GenflowError> {
        let tasks = self.task_repo.list_all().await?;
        self.rebuild_from(&tasks, now).await
    }

    /// 用已加载的任务列表重建索引
    ///
    /// 新一代写完后以 CAS 切换指针，指针已被其它重建替换时丢弃本次结果。
    /// 切换成功后把上一代中比扫描结果更新、或扫描时还不存在的条目并入新一代，再删除上一代。
    ///
    /// # 参数
    ///
    /// * `tasks` - 任务扫描结果，可能早于并发的提交
    /// * `now` - 当前时间
    ///
    /// # 返回值
    ///
    /// 新一代的条目数
    pub async fn rebuild_from(&self, tasks: &[Task], now: DateTime<Utc>) -> Result<usize, GenflowError> {
        let store = self.records.store();
        let previous_raw = store.get(&self.pointer_key()).await?;
        let previous = previous_raw
            .as_deref()
            .and_then(|raw| serde_json::from_str::<IndexGeneration>(raw).ok());

        let mut generation = store.incr_by(&self.sequence_key(), 1, self.index_ttl).await?;
        if let Some(previous) = &previous {
            // 序号键过期后会从头计数
            if generation <= previous.generation {
                generation = store
                    .incr_by(&self.sequence_key(), previous.generation - generation + 1, self.index_ttl)
                    .await?;
            }
        }
        self.drop_generation(generation).await?;

        for task in tasks {
            self.records
                .put(&self.entry_key(generation, &task.id), &TaskIndexEntry::from(task), self.index_ttl)
                .await?;
        }

        let pointer = serde_json::to_string(&IndexGeneration {
            generation,
            rebuilt_at: now,
        })
        .map_err(StoreError::from)?;
        if !store
            .compare_and_set(&self.pointer_key(), previous_raw.as_deref(), &pointer, self.index_ttl)
            .await?
        {
            self.drop_generation(generation).await?;
            debug!(generation, "Task index was rebuilt concurrently, discarding this generation");
            return Ok(tasks.len());
        }

        let mut count = tasks.len();
        if let Some(previous) = previous {
            let scanned: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
            for (task_id, entry) in self.load_entries(previous.generation).await? {
                if !scanned.contains(task_id.as_str()) {
                    if !self.task_repo.exists(&task_id).await? {
                        continue;
                    }
                    count += 1;
                }
                self.write_entry(generation, &entry).await?;
            }
            self.drop_generation(previous.generation).await?;
        }

        info!(generation, entries = count, "Task index rebuilt");
        Ok(count)
    }

    /// 插入或刷新单个任务的条目
    ///
    /// 索引不存在时跳过，等待下一次重建。写入后若指针已切换，则同时写入新一代。
    pub async fn upsert_task(&self, task: &Task) -> Result<bool, GenflowError> {
        let entry = TaskIndexEntry::from(task);
        let Some(mut current) = self.current_generation().await? else {
            return Ok(false);
        };

        let mut written = false;
        for _ in 0..MAX_GENERATION_HOPS {
            written |= self.write_entry(current.generation, &entry).await?;
            match self.current_generation().await? {
                Some(next) if next.generation != current.generation => current = next,
                _ => break,
            }
        }
        Ok(written)
    }

    /// 增量更新任务状态
    ///
    /// 只改写该任务自己的条目。条目比给定时间新时保持不变，缺失的条目由调度器的扫描补齐。
    ///
    /// # 参数
    ///
    /// * `task_id` - 任务ID
    /// * `status` - 新状态
    /// * `updated_at` - 产生该状态的任务更新时间
    ///
    /// # 返回值
    ///
    /// * `Ok(true)` - 条目状态已改变
    /// * `Ok(false)` - 索引或条目不存在，或状态未变化
    pub async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, GenflowError> {
        let Some(mut current) = self.current_generation().await? else {
            return Ok(false);
        };

        let mut changed = false;
        for _ in 0..MAX_GENERATION_HOPS {
            let key = self.entry_key(current.generation, task_id);
            let mut status_changed = false;
            let result = self
                .records
                .update::<TaskIndexEntry, StoreError, _>(&key, self.index_ttl, |entry| {
                    status_changed = false;
                    if entry.updated_at > updated_at || (entry.status == status && entry.updated_at == updated_at) {
                        return Ok(false);
                    }
                    status_changed = entry.status != status;
                    entry.status = status;
                    entry.updated_at = updated_at;
                    Ok(true)
                })
                .await;

            match result {
                Ok(_) => changed |= status_changed,
                Err(StoreError::Serialization(e)) => {
                    warn!(key = %key, error = %e, "Task index entry is corrupt, skipping status update");
                }
                Err(e) => return Err(e.into()),
            }

            match self.current_generation().await? {
                Some(next) if next.generation != current.generation => current = next,
                _ => break,
            }
        }
        Ok(changed)
    }

    pub async fn remove(&self, task_id: &str) -> Result<bool, GenflowError> {
        let Some(current) = self.current_generation().await? else {
            return Ok(false);
        };
        Ok(self
            .records
            .delete(&self.entry_key(current.generation, task_id))
            .await?)
    }

    pub async fn stats(&self) -> Result<Option<IndexStats>, GenflowError> {
        let Some(current) = self.current_generation().await? else {
            return Ok(None);
        };
        let entries = self
            .records
            .store()
            .keys_with_prefix(&self.generation_prefix(current.generation))
            .await?
            .len();
        Ok(Some(IndexStats {
            generation: current.generation,
            entries,
            rebuilt_at: current.rebuilt_at,
        }))
    }

    /// 用任务扫描结果补齐索引
    ///
    /// 缺失或落后于任务记录的条目会被重写，索引不存在时什么也不做
    ///
    /// # 返回值
    ///
    /// 重写的条目数
    pub async fn reconcile(&self, tasks: &[Task]) -> Result<usize, GenflowError> {
        let Some(current) = self.current_generation().await? else {
            return Ok(0);
        };
        let indexed = self.load_entries(current.generation).await?;

        let mut repaired = 0;
        for task in tasks {
            let entry = TaskIndexEntry::from(task);
            if indexed.get(&task.id) == Some(&entry) {
                continue;
            }
            if self.write_entry(current.generation, &entry).await? {
                repaired += 1;
            }
        }

        if repaired > 0 {
            info!(repaired, "Repaired task index entries from task records");
        }
        Ok(repaired)
    }

    /// 通过索引分页
    ///
    /// # 参数
    ///
    /// * `filter` - 过滤条件
    /// * `page` - 分页参数
    ///
    /// # 返回值
    ///
    /// * `Ok(Some(TaskPage))` - 索引可用且与任务记录一致
    /// * `Ok(None)` - 索引缺失、损坏或引用了已过期的任务，调用方应回退到扫描
    pub async fn get_paginated_tasks(
        &self,
        filter: &TaskFilter,
        page: PageRequest,
    ) -> Result<Option<TaskPage>, GenflowError> {
        let Some(current) = self.current_generation().await? else {
            return Ok(None);
        };
        let indexed = self.load_entries(current.generation).await?;

        let mut entries: Vec<&TaskIndexEntry> = indexed
            .values()
            .filter(|e| filter.matches(e.status, e.workflow_type))
            .collect();
        entries.sort_by(|a, b| newest_first((&a.created_at, &a.task_id), (&b.created_at, &b.task_id)));

        let total = entries.len();
        let mut tasks = Vec::with_capacity(page.per_page as usize);
        for entry in entries.into_iter().skip(page.offset()).take(page.per_page as usize) {
            match self.task_repo.find_by_id(&entry.task_id).await? {
                Some(task) if filter.matches(task.status, task.workflow_type) => tasks.push(task),
                Some(task) => {
                    debug!(task_id = %task.id, indexed = %entry.status, actual = %task.status, "Index entry is stale");
                    return Ok(None);
                }
                None => {
                    debug!(task_id = %entry.task_id, "Index references an expired task");
                    return Ok(None);
                }
            }
        }

        Ok(Some(TaskPage {
            tasks,
            total,
            page: page.page,
            total_pages: page.total_pages(total),
            per_page: page.per_page,
            from_index: true,
        }))
    }

    /// 清理孤儿条目（限流）
    ///
    /// # 参数
    ///
    /// * `force` - 忽略限流
    pub async fn cleanup_orphaned_tasks(&self, force: bool) -> Result<CleanupReport, GenflowError> {
        if !force
            && !self
                .records
                .store()
                .set_if_absent(&self.cleanup_marker_key(), "1", self.cleanup_interval)
                .await?
        {
            debug!("Orphan cleanup skipped, ran recently");
            return Ok(CleanupReport {
                skipped: true,
                ..CleanupReport::default()
            });
        }

        let Some(current) = self.current_generation().await? else {
            return Ok(CleanupReport::default());
        };

        let mut removed = 0;
        for task_id in self.load_entries(current.generation).await?.into_keys() {
            if !self.task_repo.exists(&task_id).await? && self.remove(&task_id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Removed orphaned task index entries");
        }

        Ok(CleanupReport {
            skipped: false,
            removed_index_entries: removed,
            removed_batches: 0,
        })
    }

    /// 删除所属任务已过期的批次记录
    pub async fn cleanup_batch_tasks(&self) -> Result<usize, GenflowError> {
        let batches = self.batch_repo.list_all().await?;
        let mut live: HashMap<String, bool> = HashMap::new();
        let mut removed = 0;

        for batch in batches {
            let exists = match live.get(&batch.task_id) {
                Some(exists) => *exists,
                None => {
                    let exists = self.task_repo.exists(&batch.task_id).await?;
                    live.insert(batch.task_id.clone(), exists);
                    exists
                }
            };
            if !exists && self.batch_repo.delete(&batch.batch_id).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "Removed batches of expired tasks");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::batch::Batch;
    use crate::domain::models::task::WorkflowType;
    use crate::infrastructure::cache::memory_store::MemoryRecordStore;
    use crate::infrastructure::repositories::batch_repo_impl::BatchRepositoryImpl;
    use crate::infrastructure::repositories::task_repo_impl::TaskRepositoryImpl;

    struct Fixture {
        index: Arc<TaskIndexService>,
        tasks: Arc<TaskRepositoryImpl>,
        batches: Arc<BatchRepositoryImpl>,
        records: JsonRecords,
    }

    fn fixture() -> Fixture {
        let records = JsonRecords::new(Arc::new(MemoryRecordStore::new()), 8);
        let ttl = Duration::from_secs(3600);
        let tasks = Arc::new(TaskRepositoryImpl::new(records.clone(), "t", ttl));
        let batches = Arc::new(BatchRepositoryImpl::new(records.clone(), "t", ttl));
        let index = Arc::new(TaskIndexService::new(
            records.clone(),
            "t",
            tasks.clone(),
            batches.clone(),
            ttl,
            Duration::from_secs(600),
        ));
        Fixture {
            index,
            tasks,
            batches,
            records,
        }
    }

    async fn seed(f: &Fixture, count: usize) -> Vec<Task> {
        let base = Utc::now();
        let mut created = Vec::new();
        for i in 0..count {
            let task = Task::new(
                WorkflowType::Quiz,
                vec![i as u64],
                5,
                base + chrono::Duration::seconds(i as i64),
            );
            f.tasks.create(&task).await.unwrap();
            created.push(task);
        }
        created
    }

    async fn fail_task(f: &Fixture, task_id: &str) -> Task {
        f.tasks
            .update(task_id, &|t: &mut Task| {
                Ok(t.fail_with("boom", Utc::now() + chrono::Duration::hours(1)))
            })
            .await
            .unwrap()
            .unwrap()
    }

    async fn page(f: &Fixture, filter: TaskFilter) -> Option<TaskPage> {
        f.index
            .get_paginated_tasks(&filter, PageRequest::new(1, 50, 100))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_rebuild_matches_store_count() {
        let f = fixture();
        seed(&f, 7).await;

        assert_eq!(f.index.rebuild_index(Utc::now()).await.unwrap(), 7);
        let page = f
            .index
            .get_paginated_tasks(&TaskFilter::default(), PageRequest::new(1, 3, 100))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(page.total, f.tasks.list_all().await.unwrap().len());
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.tasks.len(), 3);
        assert!(page.from_index);
        assert_eq!(f.index.stats().await.unwrap().unwrap().entries, 7);
    }

    #[tokio::test]
    async fn test_missing_index_returns_none() {
        let f = fixture();
        let tasks = seed(&f, 2).await;

        assert!(page(&f, TaskFilter::default()).await.is_none());
        assert!(!f.index.upsert_task(&tasks[0]).await.unwrap());
        assert!(!f
            .index
            .update_task_status(&tasks[0].id, TaskStatus::Failed, Utc::now())
            .await
            .unwrap());
        assert!(f.index.stats().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_index_is_ignored() {
        let f = fixture();
        f.records
            .store()
            .set("t:task_index", "{not json", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(page(&f, TaskFilter::default()).await.is_none());
        assert!(!f.index.remove("x").await.unwrap());

        seed(&f, 1).await;
        assert_eq!(f.index.rebuild_index(Utc::now()).await.unwrap(), 1);
        assert_eq!(page(&f, TaskFilter::default()).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_status_update_changes_filtered_total() {
        let f = fixture();
        let tasks = seed(&f, 3).await;
        f.index.rebuild_index(Utc::now()).await.unwrap();

        let failed = fail_task(&f, &tasks[0].id).await;
        assert!(f
            .index
            .update_task_status(&failed.id, failed.status, failed.updated_at)
            .await
            .unwrap());
        assert!(!f
            .index
            .update_task_status(&failed.id, TaskStatus::Pending, tasks[0].updated_at)
            .await
            .unwrap());

        let page = page(&f, TaskFilter::with_status(TaskStatus::Failed)).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.tasks[0].id, tasks[0].id);
    }

    #[tokio::test]
    async fn test_update_touches_only_its_own_entry() {
        let f = fixture();
        let tasks = seed(&f, 3).await;
        f.index.rebuild_index(Utc::now()).await.unwrap();
        let generation = f.index.stats().await.unwrap().unwrap().generation;

        let store = f.records.store();
        let pointer = store.get("t:task_index").await.unwrap();
        let neighbour_key = format!("t:task_index:{}:{}", generation, tasks[1].id);
        let neighbour = store.get(&neighbour_key).await.unwrap();
        assert!(neighbour.is_some());

        let failed = fail_task(&f, &tasks[0].id).await;
        f.index
            .update_task_status(&failed.id, failed.status, failed.updated_at)
            .await
            .unwrap();

        assert_eq!(store.get("t:task_index").await.unwrap(), pointer);
        assert_eq!(store.get(&neighbour_key).await.unwrap(), neighbour);
        assert_eq!(f.index.stats().await.unwrap().unwrap().entries, 3);
    }

    #[tokio::test]
    async fn test_older_snapshot_does_not_overwrite_newer_entry() {
        let f = fixture();
        let tasks = seed(&f, 1).await;
        f.index.rebuild_index(Utc::now()).await.unwrap();

        let failed = fail_task(&f, &tasks[0].id).await;
        assert!(f.index.upsert_task(&failed).await.unwrap());
        assert!(!f.index.upsert_task(&tasks[0]).await.unwrap());

        let page = page(&f, TaskFilter::with_status(TaskStatus::Failed)).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn test_rebuild_from_stale_scan_keeps_newer_tasks() {
        let f = fixture();
        seed(&f, 2).await;
        f.index.rebuild_index(Utc::now()).await.unwrap();

        let stale = f.tasks.list_all().await.unwrap();
        let late = Task::new(WorkflowType::Quiz, vec![99], 5, Utc::now());
        f.tasks.create(&late).await.unwrap();
        assert!(f.index.upsert_task(&late).await.unwrap());

        assert_eq!(f.index.rebuild_from(&stale, Utc::now()).await.unwrap(), 3);

        let page = page(&f, TaskFilter::default()).await.unwrap();
        assert_eq!(page.total, 3);
        assert!(page.tasks.iter().any(|t| t.id == late.id));
        assert_eq!(f.index.stats().await.unwrap().unwrap().entries, 3);
    }

    #[tokio::test]
    async fn test_reconcile_repairs_missing_and_stale_entries() {
        let f = fixture();
        let tasks = seed(&f, 2).await;
        assert_eq!(f.index.reconcile(&tasks).await.unwrap(), 0);
        f.index.rebuild_index(Utc::now()).await.unwrap();

        let late = Task::new(WorkflowType::Quiz, vec![7], 5, Utc::now());
        f.tasks.create(&late).await.unwrap();
        fail_task(&f, &tasks[0].id).await;

        let scanned = f.tasks.list_all().await.unwrap();
        assert_eq!(f.index.reconcile(&scanned).await.unwrap(), 2);
        assert_eq!(f.index.reconcile(&scanned).await.unwrap(), 0);

        assert_eq!(page(&f, TaskFilter::default()).await.unwrap().total, 3);
        let failed = page(&f, TaskFilter::with_status(TaskStatus::Failed)).await.unwrap();
        assert_eq!(failed.tasks[0].id, tasks[0].id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rebuilds_leave_a_complete_index() {
        let f = fixture();
        let tasks = seed(&f, 6).await;
        f.index.rebuild_index(Utc::now()).await.unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let index = f.index.clone();
                let tasks = tasks.clone();
                tokio::spawn(async move { index.rebuild_from(&tasks, Utc::now()).await })
            })
            .collect();
        for handle in futures::future::join_all(handles).await {
            handle.unwrap().unwrap();
        }

        let scanned = f.tasks.list_all().await.unwrap();
        f.index.reconcile(&scanned).await.unwrap();
        assert_eq!(page(&f, TaskFilter::default()).await.unwrap().total, 6);
        assert_eq!(f.index.stats().await.unwrap().unwrap().entries, 6);
    }

    #[tokio::test]
    async fn test_orphan_cleanup_is_rate_limited() {
        let f = fixture();
        let tasks = seed(&f, 2).await;
        f.index.rebuild_index(Utc::now()).await.unwrap();
        f.records
            .delete(&format!("t:task:{}", tasks[1].id))
            .await
            .unwrap();

        assert!(page(&f, TaskFilter::default()).await.is_none());

        let report = f.index.cleanup_orphaned_tasks(false).await.unwrap();
        assert_eq!(report.removed_index_entries, 1);
        assert!(f.index.cleanup_orphaned_tasks(false).await.unwrap().skipped);

        assert_eq!(page(&f, TaskFilter::default()).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_cleanup_batch_tasks_removes_orphaned_batches() {
        let f = fixture();
        let tasks = seed(&f, 1).await;
        let now = Utc::now();
        f.batches.create(&Batch::new(&tasks[0].id, 0, vec![1], now)).await.unwrap();
        f.batches.create(&Batch::new("task_gone", 0, vec![2], now)).await.unwrap();

        assert_eq!(f.index.cleanup_batch_tasks().await.unwrap(), 1);
        assert_eq!(f.batches.list_all().await.unwrap().len(), 1);
    }
}
