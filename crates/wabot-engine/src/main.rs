// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wabot Engine - Bot Instance Lease Management Server
//!
//! An HTTP server responsible for:
//! - Instance records (create, approve, renew, stop, delete)
//! - Worker processes (one per approved instance)
//! - Lease expiry (periodic sweep)

use std::sync::Arc;
use tracing::{info, warn};

use wabot_engine::config::Config;
use wabot_engine::registry::{InstanceRegistry, PostgresRegistry, SqliteRegistry};
use wabot_engine::runner::{ProcessRunner, ProcessRunnerConfig, Runner};
use wabot_engine::runtime::EngineRuntime;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wabot_engine=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;

    info!(
        http_addr = %config.http_addr,
        server_name = %config.server_name,
        bot_dir = %config.bot_dir.display(),
        "Starting Wabot Engine"
    );

    let registry: Arc<dyn InstanceRegistry> = if config.database_url.starts_with("sqlite:") {
        Arc::new(SqliteRegistry::connect(&config.database_url, &config.server_name).await?)
    } else if config.database_url.starts_with("postgres") {
        Arc::new(PostgresRegistry::connect(&config.database_url, &config.server_name).await?)
    } else {
        anyhow::bail!("Unsupported database URL scheme; expected postgres:// or sqlite:");
    };

    info!("Connected to database, migrations applied");

    tokio::fs::create_dir_all(config.instances_dir()).await?;

    let runner = Arc::new(ProcessRunner::new(ProcessRunnerConfig::from_config(&config)));
    info!(
        runner_type = runner.runner_type(),
        program = %config.worker_program,
        "Runner initialized"
    );

    let runtime = EngineRuntime::builder()
        .config(&config)
        .registry(registry)
        .runner(runner)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.bind_addr(), "Engine server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    runtime.shutdown().await?;

    info!("Wabot Engine shut down");

    Ok(())
}
