// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::application::use_cases::task_orchestrator::TaskOrchestrator;
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;

/// 维护工作器
///
/// 负责定期清理孤儿索引条目与过期任务的批次，并重建任务索引
pub struct MaintenanceWorker {
    orchestrator: Arc<TaskOrchestrator>,
    interval: Duration,
}

impl MaintenanceWorker {
    pub fn new(orchestrator: Arc<TaskOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }
}

#[async_trait]
impl Worker for MaintenanceWorker {
    async fn run_once(&self) -> Result<(), WorkerError> {
        let report = self.orchestrator.run_maintenance(false, Utc::now()).await?;
        info!(
            skipped_cleanup = report.cleanup.skipped,
            removed_index_entries = report.cleanup.removed_index_entries,
            removed_batches = report.cleanup.removed_batches,
            indexed_tasks = report.indexed_tasks,
            purged_records = report.purged_records,
            "Maintenance finished"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "maintenance"
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}
