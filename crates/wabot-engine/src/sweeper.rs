// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker expiring lapsed leases.
//!
//! Each tick calls [`LifecycleController::expire_lapsed`], the same entry
//! point used everywhere else, so expiry never bypasses the state machine.
//! A failed tick is logged and the next one retries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::controller::LifecycleController;
use crate::error::Result;

/// Configuration for the expiration sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between ticks.
    pub poll_interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Periodically expires approved instances whose lease has lapsed.
pub struct ExpirationSweeper {
    controller: Arc<LifecycleController>,
    config: SweeperConfig,
    shutdown: Arc<Notify>,
}

impl ExpirationSweeper {
    /// Create a new sweeper.
    pub fn new(controller: Arc<LifecycleController>, config: SweeperConfig) -> Self {
        Self {
            controller,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            server_name = %self.controller.server_name(),
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Expiration sweeper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Expiration sweeper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Expiration sweep failed");
                    }
                }
            }
        }

        info!("Expiration sweeper stopped");
    }

    /// Run a single sweep. Returns the ids that expired.
    pub async fn tick(&self) -> Result<Vec<String>> {
        let expired = self.controller.expire_lapsed().await?;
        if expired.is_empty() {
            debug!("No lapsed leases");
        } else {
            info!(count = expired.len(), "Expired lapsed leases");
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerConfig;
    use crate::port_allocator::PortAllocator;
    use crate::registry::{InstanceRegistry, InstanceStatus, NewInstance, SqliteRegistry};
    use crate::runner::MockRunner;
    use crate::status_proxy::HttpStatusProxy;
    use crate::supervisor::Supervisor;
    use chrono::Utc;
    use tempfile::TempDir;

    async fn setup() -> (Arc<LifecycleController>, Arc<SqliteRegistry>, TempDir) {
        let registry = Arc::new(
            SqliteRegistry::connect("sqlite::memory:", "server1")
                .await
                .unwrap(),
        );
        let dir = TempDir::new().unwrap();
        let controller = Arc::new(LifecycleController::new(
            registry.clone(),
            Arc::new(Supervisor::new(Arc::new(MockRunner::new()))),
            Arc::new(PortAllocator::new(4000)),
            Arc::new(HttpStatusProxy::new()),
            ControllerConfig {
                instances_dir: dir.path().to_path_buf(),
                stop_grace: Duration::from_millis(10),
                ..Default::default()
            },
        ));
        (controller, registry, dir)
    }

    async fn approved_and_lapsed(
        controller: &LifecycleController,
        registry: &SqliteRegistry,
    ) -> String {
        let created = controller
            .create(NewInstance {
                name: "Shop1".to_string(),
                phone_number: "+1555".to_string(),
                owner_id: None,
            })
            .await
            .unwrap();
        controller.approve(&created.id, 1).await.unwrap();
        sqlx::query("UPDATE bot_instances SET expires_at = ?1 WHERE id = ?2")
            .bind(Utc::now() - chrono::Duration::minutes(1))
            .bind(&created.id)
            .execute(registry.pool())
            .await
            .unwrap();
        created.id
    }

    #[tokio::test]
    async fn test_tick_expires_and_untracks() {
        let (controller, registry, _dir) = setup().await;
        let id = approved_and_lapsed(&controller, &registry).await;

        let sweeper = ExpirationSweeper::new(controller.clone(), SweeperConfig::default());
        assert_eq!(sweeper.tick().await.unwrap(), vec![id.clone()]);
        assert_eq!(
            registry.get(&id).await.unwrap().status,
            InstanceStatus::Expired
        );
        assert!(!controller.supervisor().is_tracked(&id).await);

        assert!(sweeper.tick().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_loop_sweeps_and_shuts_down() {
        let (controller, registry, _dir) = setup().await;
        let id = approved_and_lapsed(&controller, &registry).await;

        let sweeper = Arc::new(ExpirationSweeper::new(
            controller.clone(),
            SweeperConfig {
                poll_interval: Duration::from_millis(20),
            },
        ));
        let shutdown = sweeper.shutdown_handle();
        let task = tokio::spawn({
            let sweeper = sweeper.clone();
            async move { sweeper.run().await }
        });

        let mut expired = false;
        for _ in 0..100 {
            if registry.get(&id).await.unwrap().status == InstanceStatus::Expired {
                expired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(expired, "sweeper never expired the lapsed lease");

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_tick_does_not_stop_loop() {
        let (controller, registry, _dir) = setup().await;
        registry.pool().close().await;

        let sweeper = Arc::new(ExpirationSweeper::new(
            controller,
            SweeperConfig {
                poll_interval: Duration::from_millis(10),
            },
        ));
        assert!(sweeper.tick().await.is_err());

        let shutdown = sweeper.shutdown_handle();
        let task = tokio::spawn({
            let sweeper = sweeper.clone();
            async move { sweeper.run().await }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!task.is_finished());

        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
