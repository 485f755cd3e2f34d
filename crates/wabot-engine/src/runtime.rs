// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for wabot-engine.
//!
//! [`EngineRuntime`] wires the controller, the expiration sweeper and the HTTP
//! adapter together so the engine can run inside an existing tokio
//! application as well as from the bundled binary.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wabot_engine::registry::SqliteRegistry;
//! use wabot_engine::runner::{ProcessRunner, ProcessRunnerConfig};
//! use wabot_engine::runtime::EngineRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = wabot_engine::Config::from_env()?;
//!     let registry = SqliteRegistry::connect(&config.database_url, &config.server_name).await?;
//!     let runner = ProcessRunner::new(ProcessRunnerConfig::from_config(&config));
//!
//!     let runtime = EngineRuntime::builder()
//!         .config(&config)
//!         .registry(Arc::new(registry))
//!         .runner(Arc::new(runner))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::controller::{ControllerConfig, LifecycleController};
use crate::port_allocator::PortAllocator;
use crate::registry::InstanceRegistry;
use crate::runner::Runner;
use crate::status_proxy::{HttpStatusProxy, WorkerStatusSource};
use crate::supervisor::Supervisor;
use crate::sweeper::{ExpirationSweeper, SweeperConfig};

/// Builder for creating an [`EngineRuntime`].
pub struct EngineRuntimeBuilder {
    registry: Option<Arc<dyn InstanceRegistry>>,
    runner: Option<Arc<dyn Runner>>,
    status_source: Option<Arc<dyn WorkerStatusSource>>,
    bind_addr: SocketAddr,
    instances_dir: PathBuf,
    port_base: u16,
    sweep_interval: Duration,
    stop_grace: Duration,
    admin_username: String,
    admin_password: String,
}

impl Default for EngineRuntimeBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            runner: None,
            status_source: None,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            instances_dir: PathBuf::from("bot/instances"),
            port_base: 4000,
            sweep_interval: Duration::from_secs(60),
            stop_grace: Duration::from_secs(5),
            admin_username: "admin".to_string(),
            admin_password: "admin123".to_string(),
        }
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every tunable from an engine [`Config`].
    pub fn config(mut self, config: &Config) -> Self {
        self.bind_addr = config.http_addr;
        self.instances_dir = config.instances_dir();
        self.port_base = config.port_base;
        self.sweep_interval = config.sweep_interval;
        self.stop_grace = config.stop_grace;
        self.admin_username = config.admin_username.clone();
        self.admin_password = config.admin_password.clone();
        self
    }

    /// Set the instance registry (required).
    pub fn registry(mut self, registry: Arc<dyn InstanceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the worker runner (required).
    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the live status source.
    ///
    /// Default: [`HttpStatusProxy`] against the loopback interface.
    pub fn status_source(mut self, source: Arc<dyn WorkerStatusSource>) -> Self {
        self.status_source = Some(source);
        self
    }

    /// Set the HTTP bind address. Port 0 picks a free port.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the parent directory of per-instance state.
    pub fn instances_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.instances_dir = path.into();
        self
    }

    /// Set the port allocator seed.
    pub fn port_base(mut self, port_base: u16) -> Self {
        self.port_base = port_base;
        self
    }

    /// Set the sweeper interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the worker termination grace period.
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let registry = self
            .registry
            .ok_or_else(|| anyhow::anyhow!("registry is required"))?;
        let runner = self
            .runner
            .ok_or_else(|| anyhow::anyhow!("runner is required"))?;
        let status_source = self
            .status_source
            .unwrap_or_else(|| Arc::new(HttpStatusProxy::new()));

        Ok(EngineRuntimeConfig {
            registry,
            runner,
            status_source,
            bind_addr: self.bind_addr,
            port_base: self.port_base,
            sweep_interval: self.sweep_interval,
            controller: ControllerConfig {
                instances_dir: self.instances_dir,
                stop_grace: self.stop_grace,
                admin_username: self.admin_username,
                admin_password: self.admin_password,
                ..Default::default()
            },
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    registry: Arc<dyn InstanceRegistry>,
    runner: Arc<dyn Runner>,
    status_source: Arc<dyn WorkerStatusSource>,
    bind_addr: SocketAddr,
    port_base: u16,
    sweep_interval: Duration,
    controller: ControllerConfig,
}

impl EngineRuntimeConfig {
    /// Start the runtime: clear stale PIDs, then spawn the sweeper and the
    /// HTTP server.
    pub async fn start(self) -> Result<EngineRuntime> {
        let supervisor = Arc::new(Supervisor::new(self.runner.clone()));
        let controller = Arc::new(LifecycleController::new(
            self.registry.clone(),
            supervisor,
            Arc::new(PortAllocator::new(self.port_base)),
            self.status_source.clone(),
            self.controller,
        ));

        if let Err(e) = controller.reset_process_references().await {
            warn!(error = %e, "Failed to clear stale worker pids");
        }

        let sweeper = ExpirationSweeper::new(
            controller.clone(),
            SweeperConfig {
                poll_interval: self.sweep_interval,
            },
        );
        let sweeper_shutdown = sweeper.shutdown_handle();
        let sweeper_handle = tokio::spawn(async move {
            sweeper.run().await;
        });

        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;
        let bind_addr = listener.local_addr()?;
        let (server_shutdown_tx, server_shutdown_rx) = watch::channel(false);
        let server_handle = tokio::spawn(crate::server::serve(
            listener,
            controller.clone(),
            server_shutdown_rx,
        ));

        info!(
            bind_addr = %bind_addr,
            server_name = %controller.server_name(),
            runner = self.runner.runner_type(),
            port_base = self.port_base,
            "EngineRuntime started"
        );

        Ok(EngineRuntime {
            server_handle,
            sweeper_handle,
            server_shutdown_tx,
            sweeper_shutdown,
            controller,
            bind_addr,
        })
    }
}

/// A running engine that can be embedded in an application.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination; it also stops
/// every supervised worker.
pub struct EngineRuntime {
    server_handle: JoinHandle<Result<()>>,
    sweeper_handle: JoinHandle<()>,
    server_shutdown_tx: watch::Sender<bool>,
    sweeper_shutdown: Arc<Notify>,
    controller: Arc<LifecycleController>,
    bind_addr: SocketAddr,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// Address the HTTP server is bound to.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// The lifecycle controller.
    pub fn controller(&self) -> &Arc<LifecycleController> {
        &self.controller
    }

    /// Gracefully shut down: sweeper, then HTTP server, then workers.
    pub async fn shutdown(self) -> Result<()> {
        info!("EngineRuntime shutting down...");

        self.sweeper_shutdown.notify_one();
        if let Err(e) = self.sweeper_handle.await {
            error!("Expiration sweeper task panicked: {}", e);
        }

        let _ = self.server_shutdown_tx.send(true);
        let server_result = match self.server_handle.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("server task panicked: {}", e)),
        };

        let stopped = self.controller.shutdown().await;
        info!(workers_stopped = stopped, "EngineRuntime shutdown complete");

        if let Err(e) = &server_result {
            error!("EngineRuntime server error during shutdown: {}", e);
        }
        server_result
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished() && !self.sweeper_handle.is_finished()
    }
}
