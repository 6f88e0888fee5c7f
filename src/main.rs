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

use genflow::application::use_cases::task_orchestrator::TaskOrchestrator;
use genflow::config::settings::Settings;
use genflow::presentation::routes;
use genflow::utils::telemetry;
use genflow::workers::manager::WorkerManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动服务
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting genflow...");

    // 2. Load configuration
    let settings = Settings::new()?;
    info!(
        backend = %settings.storage.backend,
        remote = %settings.remote.base_url,
        "Configuration loaded"
    );

    if settings.metrics.enabled {
        genflow::infrastructure::metrics::init_metrics(&settings.metrics.listen_addr);
    }

    // 3. Build the orchestrator over the configured record store
    let orchestrator = Arc::new(TaskOrchestrator::from_settings(&settings).await?);
    info!("Task orchestrator initialized");

    // 4. Start workers
    let mut worker_manager = WorkerManager::new();
    worker_manager.start_workers(orchestrator.clone(), &settings);
    info!(workers = worker_manager.len(), "Workers started");

    // 5. Start HTTP server
    let app = routes::app(orchestrator);
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server stopped: {}", e);
        }
    });

    worker_manager.wait_for_shutdown().await;

    Ok(())
}
