// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner trait definitions.
//!
//! Defines the abstract interface for launching and stopping worker processes.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors from runner operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// Worker executable was not found.
    #[error("Worker program not found: {0}")]
    ProgramNotFound(String),

    /// Process failed to start or died during startup.
    #[error("Worker start failed: {0}")]
    StartFailed(String),

    /// A live worker is already tracked for the instance.
    #[error("Worker already running for instance {0}")]
    AlreadyRunning(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Options for launching a worker.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Instance ID, passed as the first positional argument.
    pub instance_id: String,
    /// Phone number, passed as the second positional argument.
    pub phone_number: String,
    /// Control port, passed as the third positional argument.
    pub port: u16,
}

/// Handle for a launched worker.
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    /// Unique identifier for this launch.
    pub handle_id: String,
    /// Instance ID
    pub instance_id: String,
    /// When the worker was started
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// PID captured from the child at spawn time.
    pub spawned_pid: Option<u32>,
}

/// Trait for worker runners.
///
/// Runners only launch and stop processes. They never touch the registry;
/// recording state is the caller's job.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runner type identifier (e.g., "process", "mock")
    fn runner_type(&self) -> &'static str;

    /// Launch a worker without waiting for it to finish.
    async fn launch_detached(&self, options: &LaunchOptions) -> Result<RunnerHandle>;

    /// Check if a worker is still running.
    async fn is_running(&self, handle: &RunnerHandle) -> bool;

    /// Stop a worker: polite termination, then a forced kill once `grace`
    /// elapses. Stopping a worker that already exited is not an error.
    async fn stop(&self, handle: &RunnerHandle, grace: Duration) -> Result<()>;
}
