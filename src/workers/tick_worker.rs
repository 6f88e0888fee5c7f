// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::application::use_cases::task_orchestrator::TaskOrchestrator;
use crate::utils::errors::WorkerError;
use crate::workers::worker::Worker;

/// 调度 tick 工作器
///
/// 周期性执行派发、轮询与卡住恢复。外部触发器可能丢失，
/// RunNow 与 `/v1/tick` 是同一工作的手动入口。
pub struct TickWorker {
    orchestrator: Arc<TaskOrchestrator>,
    interval: Duration,
}

impl TickWorker {
    pub fn new(orchestrator: Arc<TaskOrchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }
}

#[async_trait]
impl Worker for TickWorker {
    async fn run_once(&self) -> Result<(), WorkerError> {
        let report = self.orchestrator.run_tick(Utc::now()).await;
        counter!("scheduler_ticks_total").increment(1);

        if report.dispatch.dispatched > 0 || !report.polls.is_empty() || !report.recovery.recovered.is_empty() {
            info!(
                dispatched = report.dispatch.dispatched,
                polled = report.polls.len(),
                recovered = report.recovery.recovered.len(),
                circuit_open = report.dispatch.circuit_open,
                "Scheduler tick"
            );
        }

        if report.errors.is_empty() {
            Ok(())
        } else {
            Err(WorkerError::InternalError(report.errors.join("; ")))
        }
    }

    fn name(&self) -> &str {
        "tick"
    }

    fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
#[path = "tick_worker_test.rs"]
mod tests;
