// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::application::use_cases::task_orchestrator::TaskOrchestrator;
use crate::config::settings::Settings;
use crate::workers::maintenance_worker::MaintenanceWorker;
use crate::workers::tick_worker::TickWorker;
use crate::workers::worker::Worker;

/// 工作管理器
///
/// 为每个工作器启动一个周期循环，关闭时中止全部循环
#[derive(Default)]
pub struct WorkerManager {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 启动调度与维护工作器
    ///
    /// # 参数
    ///
    /// * `orchestrator` - 任务编排器
    /// * `settings` - 配置
    pub fn start_workers(&mut self, orchestrator: Arc<TaskOrchestrator>, settings: &Settings) {
        self.spawn(Arc::new(TickWorker::new(
            orchestrator.clone(),
            Duration::from_secs(settings.scheduler.tick_interval_secs),
        )));
        self.spawn(Arc::new(MaintenanceWorker::new(
            orchestrator,
            Duration::from_secs(settings.maintenance.interval_secs),
        )));
    }

    /// 以固定间隔运行工作器，单轮失败只记录日志
    pub fn spawn(&mut self, worker: Arc<dyn Worker>) {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(worker.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(worker = worker.name(), every = ?worker.interval(), "Worker started");

            loop {
                interval.tick().await;
                if let Err(e) = worker.run_once().await {
                    error!(worker = worker.name(), error = %e, "Worker run failed");
                }
            }
        });
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 中止全部工作器
    pub fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        info!("Workers shut down successfully");
    }

    /// 等待关闭信号并关闭工作进程
    pub async fn wait_for_shutdown(&mut self) {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(err) => error!("Unable to listen for shutdown signal: {}", err),
        }

        info!("Shutting down workers...");
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::WorkerError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingWorker {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Worker for CountingWorker {
        async fn run_once(&self) -> Result<(), WorkerError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Err(WorkerError::InternalError("keeps going".to_string()))
        }

        fn name(&self) -> &str {
            "counting"
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(10)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_loop_survives_failures() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut manager = WorkerManager::new();
        manager.spawn(Arc::new(CountingWorker { runs: runs.clone() }));

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        manager.shutdown();
        assert!(manager.is_empty());
    }
}
