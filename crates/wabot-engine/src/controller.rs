// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle Controller
//!
//! State machine over instance records:
//!
//! ```text
//!            approve                 sweep (expires_at <= now)
//!   new ─────────────────► approved ─────────────────────────► expired
//!                           │  ▲                                 │
//!                    delete │  └──────────── renew ──────────────┘
//!                           ▼
//!                        (gone)
//! ```
//!
//! Manual `stop` kills the worker but leaves the lease untouched.
//!
//! Approve and renew start the worker *before* the conditional registry
//! write. A spawn failure leaves the record as it was; a lost registry race
//! stops the freshly started worker again.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::port_allocator::PortAllocator;
use crate::runner::RunnerError;
use crate::registry::{
    Instance, InstanceRegistry, InstanceStatus, LeaseDuration, NewInstance, StatusCounts,
};
use crate::status_proxy::{COMMAND_TIMEOUT, READ_TIMEOUT, WorkerStatusSource};
use crate::supervisor::Supervisor;

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Parent of the per-instance state directories.
    pub instances_dir: PathBuf,
    /// Grace period between polite and forced termination.
    pub stop_grace: Duration,
    /// Timeout for live status reads.
    pub read_timeout: Duration,
    /// Timeout for worker control commands.
    pub command_timeout: Duration,
    /// Shared admin username.
    pub admin_username: String,
    /// Shared admin password.
    pub admin_password: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            instances_dir: PathBuf::from("bot/instances"),
            stop_grace: Duration::from_secs(5),
            read_timeout: READ_TIMEOUT,
            command_timeout: COMMAND_TIMEOUT,
            admin_username: "admin".to_string(),
            admin_password: "admin123".to_string(),
        }
    }
}

/// Instance record merged with live worker state.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceView {
    /// Persisted record.
    #[serde(flatten)]
    pub instance: Instance,
    /// Whether the supervisor holds a live worker for this instance.
    pub is_running: bool,
    /// Status reported by the worker, if it was queried.
    pub live_status: Option<String>,
    /// Outstanding pairing code, if any.
    pub pairing_code: Option<String>,
    /// Account the worker is paired with, if any.
    pub connected_user: Option<Value>,
}

/// Pairing code lookup result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairingCodeView {
    /// Instance ID.
    pub instance_id: String,
    /// Current pairing code.
    pub pairing_code: Option<String>,
    /// Whether the code is still usable.
    pub pairing_code_valid: bool,
    /// Seconds until the code lapses.
    pub pairing_code_remaining_seconds: Option<i64>,
    /// Live status, or the persisted status when the worker is unreachable.
    pub status: String,
}

/// Per-server record counts.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    /// Server identity.
    pub server_name: String,
    /// Counts per status.
    #[serde(flatten)]
    pub counts: StatusCounts,
}

/// Engine health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// "healthy" or "unhealthy".
    pub status: &'static str,
    /// "connected" or "disconnected".
    pub database: &'static str,
    /// Server identity.
    pub server_name: String,
    /// Crate version.
    pub version: &'static str,
    /// When the report was produced.
    pub timestamp: DateTime<Utc>,
}

/// Coordinates registry, supervisor, allocator and status source.
pub struct LifecycleController {
    registry: Arc<dyn InstanceRegistry>,
    supervisor: Arc<Supervisor>,
    ports: Arc<PortAllocator>,
    status: Arc<dyn WorkerStatusSource>,
    config: ControllerConfig,
}

impl LifecycleController {
    /// Create a new controller.
    pub fn new(
        registry: Arc<dyn InstanceRegistry>,
        supervisor: Arc<Supervisor>,
        ports: Arc<PortAllocator>,
        status: Arc<dyn WorkerStatusSource>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            registry,
            supervisor,
            ports,
            status,
            config,
        }
    }

    /// Supervisor owning the live workers.
    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    /// Server identity of the underlying registry.
    pub fn server_name(&self) -> &str {
        self.registry.server_identity()
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Create an instance in `new`.
    pub async fn create(&self, request: NewInstance) -> Result<Instance> {
        request.validate()?;
        let instance = self.registry.create(&request).await?;
        info!(
            instance_id = %instance.id,
            name = %instance.name,
            server_name = %instance.server_name,
            "Instance created"
        );
        Ok(instance)
    }

    /// `new` → `approved`: allocate a port and start the worker.
    pub async fn approve(&self, instance_id: &str, months: i64) -> Result<Instance> {
        let duration = LeaseDuration::from_months(months)?;
        let instance = self.registry.get(instance_id).await?;
        if instance.status != InstanceStatus::New {
            return Err(Error::invalid_state(
                instance_id,
                InstanceStatus::New,
                instance.status,
            ));
        }

        let port = self.ports.allocate()?;
        info!(instance_id = %instance_id, port = port, "Allocated worker port");

        self.start_and_transition(&instance, InstanceStatus::New, duration, port)
            .await
    }

    /// `expired` → `approved`: reuse the stored port (or allocate one) and
    /// start the worker.
    pub async fn renew(&self, instance_id: &str, months: i64) -> Result<Instance> {
        let duration = LeaseDuration::from_months(months)?;
        let instance = self.registry.get(instance_id).await?;
        if instance.status != InstanceStatus::Expired {
            return Err(Error::invalid_state(
                instance_id,
                InstanceStatus::Expired,
                instance.status,
            ));
        }

        let port = match instance.port {
            Some(port) => port,
            None => self.ports.allocate()?,
        };

        self.start_and_transition(&instance, InstanceStatus::Expired, duration, port)
            .await
    }

    async fn start_and_transition(
        &self,
        instance: &Instance,
        from: InstanceStatus,
        duration: LeaseDuration,
        port: u16,
    ) -> Result<Instance> {
        let grace = self.config.stop_grace;
        let handle = self
            .supervisor
            .start(&instance.id, &instance.phone_number, port, grace)
            .await
            .map_err(|e| match e {
                RunnerError::AlreadyRunning(_) => {
                    warn!(
                        instance_id = %instance.id,
                        "Worker already running, another transition is in flight"
                    );
                    Error::invalid_state(&instance.id, from, "running")
                }
                e => {
                    error!(
                        instance_id = %instance.id,
                        port = port,
                        error = %e,
                        "Failed to start worker"
                    );
                    Error::ProcessStart(e)
                }
            })?;

        let transitioned = match from {
            InstanceStatus::Expired => {
                self.registry
                    .transition_to_approved_from_expired(&instance.id, duration, port)
                    .await
            }
            _ => {
                self.registry
                    .transition_to_approved(&instance.id, duration, port)
                    .await
            }
        };

        let mut updated = match transitioned {
            Ok(updated) => updated,
            Err(e) => {
                warn!(
                    instance_id = %instance.id,
                    error = %e,
                    "Registry transition failed, stopping freshly started worker"
                );
                self.supervisor
                    .stop_handle(&instance.id, &handle.handle_id, grace)
                    .await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .registry
            .record_process_reference(&instance.id, handle.spawned_pid)
            .await
        {
            warn!(instance_id = %instance.id, error = %e, "Failed to record worker pid");
        } else {
            updated.pid = handle.spawned_pid;
        }

        info!(
            instance_id = %updated.id,
            from = %from,
            port = port,
            duration_months = duration.months(),
            expires_at = ?updated.expires_at,
            "Instance approved"
        );

        Ok(updated)
    }

    /// Stop the worker of an `approved` instance, keeping its lease.
    pub async fn stop(&self, instance_id: &str) -> Result<Instance> {
        let mut instance = self.registry.get(instance_id).await?;
        if instance.status != InstanceStatus::Approved {
            return Err(Error::invalid_state(
                instance_id,
                InstanceStatus::Approved,
                instance.status,
            ));
        }

        if !self.worker_alive(&mut instance).await {
            return Err(Error::invalid_state(instance_id, "running", "stopped"));
        }

        self.supervisor
            .stop(instance_id, self.config.stop_grace)
            .await;
        self.clear_process_reference(instance_id).await;
        instance.pid = None;

        info!(instance_id = %instance_id, "Instance stopped");
        Ok(instance)
    }

    /// Remove an `approved` instance along with its on-disk state.
    pub async fn delete(&self, instance_id: &str) -> Result<()> {
        let instance = self.registry.get(instance_id).await?;
        if instance.status != InstanceStatus::Approved {
            return Err(Error::invalid_state(
                instance_id,
                InstanceStatus::Approved,
                instance.status,
            ));
        }

        self.supervisor
            .stop(instance_id, self.config.stop_grace)
            .await;

        let dir = self.config.instances_dir.join(&instance.id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(
                    instance_id = %instance_id,
                    path = %dir.display(),
                    error = %e,
                    "Failed to remove instance directory"
                );
                return Err(Error::Io(e));
            }
        }

        self.registry.delete(instance_id).await?;
        info!(instance_id = %instance_id, "Instance deleted");
        Ok(())
    }

    /// Expire every lapsed lease and stop its worker.
    ///
    /// Returns the ids that changed status.
    pub async fn expire_lapsed(&self) -> Result<Vec<String>> {
        let expired = self.registry.transition_to_expired_bulk().await?;

        for instance_id in &expired {
            self.supervisor
                .stop(instance_id, self.config.stop_grace)
                .await;
            self.clear_process_reference(instance_id).await;
            info!(instance_id = %instance_id, "Lease expired");
        }

        Ok(expired)
    }

    /// Whether the instance has a live worker. A pid left behind by a worker
    /// that died is cleared.
    async fn worker_alive(&self, instance: &mut Instance) -> bool {
        if self.supervisor.is_running(&instance.id).await {
            return true;
        }
        if instance.pid.is_some() {
            info!(instance_id = %instance.id, "Clearing pid of dead worker");
            self.clear_process_reference(&instance.id).await;
            instance.pid = None;
        }
        false
    }

    async fn clear_process_reference(&self, instance_id: &str) {
        if let Err(e) = self
            .registry
            .record_process_reference(instance_id, None)
            .await
        {
            warn!(instance_id = %instance_id, error = %e, "Failed to clear worker pid");
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch one instance with live state.
    pub async fn get(&self, instance_id: &str) -> Result<InstanceView> {
        let instance = self.registry.get(instance_id).await?;
        Ok(self.view(instance).await)
    }

    /// List instances with live state, newest first.
    pub async fn list(&self, status: Option<InstanceStatus>) -> Result<Vec<InstanceView>> {
        let instances = self.registry.list(status).await?;
        let mut views = Vec::with_capacity(instances.len());
        for instance in instances {
            views.push(self.view(instance).await);
        }
        Ok(views)
    }

    async fn view(&self, instance: Instance) -> InstanceView {
        let mut view = InstanceView {
            is_running: false,
            live_status: None,
            pairing_code: None,
            connected_user: None,
            instance,
        };

        let Some(port) = view.instance.port else {
            return view;
        };
        if !self.worker_alive(&mut view.instance).await {
            return view;
        }

        view.is_running = true;
        let snapshot = self
            .status
            .query(&view.instance.id, port, self.config.read_timeout)
            .await;
        view.live_status = Some(snapshot.status);
        view.pairing_code = snapshot.pairing_code;
        view.connected_user = snapshot.connected_user;
        view
    }

    /// Current pairing code of an instance.
    pub async fn pairing_code(&self, instance_id: &str) -> Result<PairingCodeView> {
        let mut instance = self.registry.get(instance_id).await?;
        let mut view = PairingCodeView {
            instance_id: instance.id.clone(),
            pairing_code: None,
            pairing_code_valid: false,
            pairing_code_remaining_seconds: None,
            status: instance.status.to_string(),
        };

        let Some(port) = instance.port else {
            return Ok(view);
        };
        if !self.worker_alive(&mut instance).await {
            return Ok(view);
        }

        let snapshot = self
            .status
            .query(instance_id, port, self.config.read_timeout)
            .await;
        if !snapshot.is_offline() {
            view.status = snapshot.status;
        }
        view.pairing_code = snapshot.pairing_code;
        view.pairing_code_valid = snapshot.pairing_code_valid;
        view.pairing_code_remaining_seconds = snapshot.remaining_seconds;
        Ok(view)
    }

    /// Ask the worker for a fresh pairing code.
    pub async fn regenerate_code(&self, instance_id: &str) -> Result<Value> {
        let instance = self.registry.get(instance_id).await?;
        let port = instance.port.ok_or_else(|| {
            Error::InvalidInput(format!("Instance '{}' has no port assigned", instance_id))
        })?;

        let reply = self
            .status
            .regenerate_code(instance_id, port, self.config.command_timeout)
            .await?;
        info!(instance_id = %instance_id, "Pairing code regenerated");
        Ok(reply)
    }

    /// Per-status counts for this server.
    pub async fn server_info(&self) -> Result<ServerInfo> {
        Ok(ServerInfo {
            server_name: self.server_name().to_string(),
            counts: self.registry.count_by_status().await?,
        })
    }

    /// Store connectivity and identity.
    pub async fn health(&self) -> HealthReport {
        let healthy = self.registry.health_check().await;
        HealthReport {
            status: if healthy { "healthy" } else { "unhealthy" },
            database: if healthy { "connected" } else { "disconnected" },
            server_name: self.server_name().to_string(),
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now(),
        }
    }

    /// Check the shared admin credential.
    pub fn login(&self, username: &str, password: &str) -> bool {
        username == self.config.admin_username && password == self.config.admin_password
    }

    // ------------------------------------------------------------------
    // Engine lifecycle
    // ------------------------------------------------------------------

    /// Clear PIDs left over from a previous run.
    pub async fn reset_process_references(&self) -> Result<u64> {
        let cleared = self.registry.reset_process_references().await?;
        if cleared > 0 {
            info!(count = cleared, "Cleared stale worker pids");
        }
        Ok(cleared)
    }

    /// Stop every supervised worker.
    pub async fn shutdown(&self) -> usize {
        self.supervisor.shutdown(self.config.stop_grace).await
    }
}
