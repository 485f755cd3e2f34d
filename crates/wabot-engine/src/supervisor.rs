// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process Supervisor
//!
//! Owns the in-memory `instance id -> (handle, port)` map for the current
//! engine run. The map starts empty on every start; persisted PIDs from a
//! previous run are never consulted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::runner::{LaunchOptions, Runner, RunnerError, RunnerHandle};

/// A worker tracked by the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisedWorker {
    /// Runner handle.
    pub handle: RunnerHandle,
    /// Control port the worker was started with.
    pub port: u16,
}

/// Tracks live worker processes.
pub struct Supervisor {
    runner: Arc<dyn Runner>,
    workers: Mutex<HashMap<String, SupervisedWorker>>,
}

impl Supervisor {
    /// Create a supervisor with an empty process table.
    pub fn new(runner: Arc<dyn Runner>) -> Self {
        Self {
            runner,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Launch a worker and track it under `instance_id`.
    ///
    /// Refuses with [`RunnerError::AlreadyRunning`] while a live worker is
    /// tracked under the same id; a dead one is reaped and replaced. The
    /// process table stays locked for the whole start, so concurrent starts
    /// for one id never both launch.
    pub async fn start(
        &self,
        instance_id: &str,
        phone_number: &str,
        port: u16,
        grace: Duration,
    ) -> Result<RunnerHandle, RunnerError> {
        let mut workers = self.workers.lock().await;

        let existing = workers.get(instance_id).cloned();
        if let Some(existing) = existing {
            if self.runner.is_running(&existing.handle).await {
                return Err(RunnerError::AlreadyRunning(instance_id.to_string()));
            }
            warn!(
                instance_id = %instance_id,
                handle_id = %existing.handle.handle_id,
                "Tracked worker is dead, replacing it"
            );
            workers.remove(instance_id);
            self.terminate(instance_id, &existing, grace).await;
        }

        let handle = self
            .runner
            .launch_detached(&LaunchOptions {
                instance_id: instance_id.to_string(),
                phone_number: phone_number.to_string(),
                port,
            })
            .await?;

        workers.insert(
            instance_id.to_string(),
            SupervisedWorker {
                handle: handle.clone(),
                port,
            },
        );

        Ok(handle)
    }

    /// Stop the worker tracked under `instance_id`.
    ///
    /// Returns `false` without doing anything if the id is untracked. The
    /// mapping is removed whatever the outcome of the termination.
    pub async fn stop(&self, instance_id: &str, grace: Duration) -> bool {
        let worker = self.workers.lock().await.remove(instance_id);
        match worker {
            Some(worker) => {
                self.terminate(instance_id, &worker, grace).await;
                true
            }
            None => false,
        }
    }

    /// Stop the worker under `instance_id` only if it is the launch `handle_id`.
    ///
    /// Returns `false` when the id is untracked or tracks another launch.
    pub async fn stop_handle(&self, instance_id: &str, handle_id: &str, grace: Duration) -> bool {
        let worker = {
            let mut workers = self.workers.lock().await;
            if workers
                .get(instance_id)
                .is_some_and(|w| w.handle.handle_id == handle_id)
            {
                workers.remove(instance_id)
            } else {
                None
            }
        };
        match worker {
            Some(worker) => {
                self.terminate(instance_id, &worker, grace).await;
                true
            }
            None => false,
        }
    }

    /// Whether `instance_id` has a tracked worker that is still alive.
    ///
    /// A worker found dead is dropped from the map.
    pub async fn is_running(&self, instance_id: &str) -> bool {
        let worker = self.workers.lock().await.get(instance_id).cloned();
        let Some(worker) = worker else {
            return false;
        };

        if self.runner.is_running(&worker.handle).await {
            return true;
        }

        let mut workers = self.workers.lock().await;
        if workers
            .get(instance_id)
            .is_some_and(|w| w.handle.handle_id == worker.handle.handle_id)
        {
            workers.remove(instance_id);
        }
        false
    }

    /// Whether `instance_id` is in the map, alive or not.
    pub async fn is_tracked(&self, instance_id: &str) -> bool {
        self.workers.lock().await.contains_key(instance_id)
    }

    /// Tracked worker for `instance_id`.
    pub async fn worker(&self, instance_id: &str) -> Option<SupervisedWorker> {
        self.workers.lock().await.get(instance_id).cloned()
    }

    /// Ids currently in the map.
    pub async fn tracked_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every tracked worker. Returns how many were stopped.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let workers: Vec<(String, SupervisedWorker)> =
            self.workers.lock().await.drain().collect();
        let count = workers.len();

        for (instance_id, worker) in &workers {
            self.terminate(instance_id, worker, grace).await;
        }

        if count > 0 {
            info!(count = count, "Stopped all supervised workers");
        }
        count
    }

    async fn terminate(&self, instance_id: &str, worker: &SupervisedWorker, grace: Duration) {
        match self.runner.stop(&worker.handle, grace).await {
            Ok(()) => {
                info!(instance_id = %instance_id, port = worker.port, "Stopped worker");
            }
            Err(e) => {
                warn!(
                    instance_id = %instance_id,
                    error = %e,
                    "Failed to stop worker cleanly, dropping it anyway"
                );
            }
        }
    }
}
