// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Native process runner.
//!
//! Spawns one OS process per worker as
//! `<program> [script] <instance_id> <phone_number> <port>` with the bot
//! directory as working directory. Stdout and stderr are appended to
//! `<instances_dir>/<instance_id>/worker.log`.

use async_trait::async_trait;
use chrono::Utc;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::traits::*;
use crate::config::Config;

/// Log file name inside each instance directory.
pub const WORKER_LOG_FILE: &str = "worker.log";

/// Configuration for the process runner.
#[derive(Debug, Clone)]
pub struct ProcessRunnerConfig {
    /// Executable to spawn.
    pub program: String,
    /// Optional script argument placed before the positional arguments.
    pub script: Option<String>,
    /// Working directory for every worker.
    pub working_dir: PathBuf,
    /// Parent of the per-instance state directories.
    pub instances_dir: PathBuf,
}

impl ProcessRunnerConfig {
    /// Build from engine configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.worker_program.clone(),
            script: config.worker_script.clone(),
            working_dir: config.bot_dir.clone(),
            instances_dir: config.instances_dir(),
        }
    }
}

/// Runner that launches workers as child processes.
pub struct ProcessRunner {
    config: ProcessRunnerConfig,
    children: Mutex<HashMap<String, Child>>,
}

impl ProcessRunner {
    /// Create a new process runner.
    pub fn new(config: ProcessRunnerConfig) -> Self {
        Self {
            config,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Path of the log file for an instance.
    pub fn log_path(&self, instance_id: &str) -> PathBuf {
        self.config
            .instances_dir
            .join(instance_id)
            .join(WORKER_LOG_FILE)
    }

    fn open_log(&self, instance_id: &str) -> Result<std::fs::File> {
        let dir = self.config.instances_dir.join(instance_id);
        std::fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(WORKER_LOG_FILE))?;
        Ok(file)
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    fn runner_type(&self) -> &'static str {
        "process"
    }

    async fn launch_detached(&self, options: &LaunchOptions) -> Result<RunnerHandle> {
        let log = self.open_log(&options.instance_id)?;

        let mut cmd = Command::new(&self.config.program);
        if let Some(script) = &self.config.script {
            cmd.arg(script);
        }
        cmd.arg(&options.instance_id)
            .arg(&options.phone_number)
            .arg(options.port.to_string())
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::ProgramNotFound(self.config.program.clone())
            } else {
                RunnerError::Io(e)
            }
        })?;

        if let Ok(Some(status)) = child.try_wait()
            && !status.success()
        {
            return Err(RunnerError::StartFailed(format!(
                "worker exited immediately with status: {}",
                status
            )));
        }

        let spawned_pid = child.id();
        let handle_id = match spawned_pid {
            Some(pid) => format!("proc_{}", pid),
            None => format!("proc_{}", uuid::Uuid::new_v4().simple()),
        };

        info!(
            instance_id = %options.instance_id,
            port = options.port,
            pid = ?spawned_pid,
            program = %self.config.program,
            "Launched worker process"
        );

        self.children.lock().await.insert(handle_id.clone(), child);

        Ok(RunnerHandle {
            handle_id,
            instance_id: options.instance_id.clone(),
            started_at: Utc::now(),
            spawned_pid,
        })
    }

    async fn is_running(&self, handle: &RunnerHandle) -> bool {
        let mut children = self.children.lock().await;
        let Some(child) = children.get_mut(&handle.handle_id) else {
            return false;
        };

        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(
                    instance_id = %handle.instance_id,
                    status = %status,
                    "Worker process has exited"
                );
                children.remove(&handle.handle_id);
                false
            }
            Err(_) => false,
        }
    }

    async fn stop(&self, handle: &RunnerHandle, grace: Duration) -> Result<()> {
        let child = self.children.lock().await.remove(&handle.handle_id);
        let Some(mut child) = child else {
            return Ok(());
        };

        if let Ok(Some(_)) = child.try_wait() {
            return Ok(());
        }

        if let Some(pid) = child.id() {
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {}
                Err(nix::errno::Errno::ESRCH) => return Ok(()),
                Err(e) => {
                    warn!(
                        instance_id = %handle.instance_id,
                        pid = pid,
                        error = %e,
                        "Failed to send SIGTERM"
                    );
                }
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                info!(
                    instance_id = %handle.instance_id,
                    status = %status,
                    "Worker process terminated"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(RunnerError::Io(e)),
            Err(_) => {
                warn!(
                    instance_id = %handle.instance_id,
                    grace_secs = grace.as_secs_f64(),
                    "Worker ignored SIGTERM, killing"
                );
                child.kill().await?;
                Ok(())
            }
        }
    }
}
