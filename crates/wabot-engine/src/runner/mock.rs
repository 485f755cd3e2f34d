// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runner for testing.
//!
//! Simulates worker processes without spawning anything.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::traits::*;

#[derive(Debug, Clone)]
struct MockProcess {
    instance_id: String,
    running: bool,
}

/// Mock runner for testing.
pub struct MockRunner {
    processes: Arc<Mutex<HashMap<String, MockProcess>>>,
    fail_launch: AtomicBool,
    next_pid: AtomicU32,
    launches: AtomicU32,
    stops: AtomicU32,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// Create a new mock runner.
    pub fn new() -> Self {
        Self {
            processes: Arc::new(Mutex::new(HashMap::new())),
            fail_launch: AtomicBool::new(false),
            next_pid: AtomicU32::new(10_000),
            launches: AtomicU32::new(0),
            stops: AtomicU32::new(0),
        }
    }

    /// Create a mock runner whose launches always fail.
    pub fn failing() -> Self {
        let runner = Self::new();
        runner.set_fail_launch(true);
        runner
    }

    /// Toggle launch failures.
    pub fn set_fail_launch(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    /// Simulate a worker dying on its own.
    pub async fn crash(&self, instance_id: &str) {
        let mut processes = self.processes.lock().await;
        for process in processes.values_mut() {
            if process.instance_id == instance_id {
                process.running = false;
            }
        }
    }

    /// Instance ids with a live simulated process.
    pub async fn running_instances(&self) -> Vec<String> {
        let processes = self.processes.lock().await;
        let mut ids: Vec<String> = processes
            .values()
            .filter(|p| p.running)
            .map(|p| p.instance_id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of successful launches.
    pub fn launch_count(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    /// Number of stop calls.
    pub fn stop_count(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runner for MockRunner {
    fn runner_type(&self) -> &'static str {
        "mock"
    }

    async fn launch_detached(&self, options: &LaunchOptions) -> Result<RunnerHandle> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(RunnerError::StartFailed("Mock launch failure".to_string()));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let handle = RunnerHandle {
            handle_id: format!("mock_{}", pid),
            instance_id: options.instance_id.clone(),
            started_at: Utc::now(),
            spawned_pid: Some(pid),
        };

        self.processes.lock().await.insert(
            handle.handle_id.clone(),
            MockProcess {
                instance_id: options.instance_id.clone(),
                running: true,
            },
        );
        self.launches.fetch_add(1, Ordering::SeqCst);

        Ok(handle)
    }

    async fn is_running(&self, handle: &RunnerHandle) -> bool {
        let processes = self.processes.lock().await;
        processes
            .get(&handle.handle_id)
            .map(|p| p.running)
            .unwrap_or(false)
    }

    async fn stop(&self, handle: &RunnerHandle, _grace: Duration) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let mut processes = self.processes.lock().await;
        if let Some(process) = processes.get_mut(&handle.handle_id) {
            process.running = false;
        }
        Ok(())
    }
}
