// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ProcessRunner tests against real `/bin/sh` processes.

use std::path::Path;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use wabot_engine::runner::{
    LaunchOptions, ProcessRunner, ProcessRunnerConfig, Runner, RunnerError,
};

fn runner(dir: &Path, script: &str) -> ProcessRunner {
    let script_path = dir.join("worker.sh");
    std::fs::write(&script_path, script).unwrap();

    ProcessRunner::new(ProcessRunnerConfig {
        program: "/bin/sh".to_string(),
        script: Some(script_path.to_string_lossy().into_owned()),
        working_dir: dir.to_path_buf(),
        instances_dir: dir.join("instances"),
    })
}

fn options(id: &str) -> LaunchOptions {
    LaunchOptions {
        instance_id: id.to_string(),
        phone_number: "+1555".to_string(),
        port: 4001,
    }
}

async fn wait_for_file(path: &Path) -> String {
    for _ in 0..100 {
        if let Ok(contents) = std::fs::read_to_string(path)
            && !contents.is_empty()
        {
            return contents;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never written", path.display());
}

#[tokio::test]
async fn test_worker_receives_positional_args_and_logs() {
    let dir = TempDir::new().unwrap();
    let runner = runner(dir.path(), "echo \"args: $1 $2 $3\"\nexec sleep 30\n");

    let handle = runner.launch_detached(&options("abc12345")).await.unwrap();
    assert!(handle.spawned_pid.is_some());
    assert!(runner.is_running(&handle).await);

    let log = wait_for_file(&runner.log_path("abc12345")).await;
    assert!(log.contains("args: abc12345 +1555 4001"), "log was: {}", log);

    runner.stop(&handle, Duration::from_secs(5)).await.unwrap();
    assert!(!runner.is_running(&handle).await);
}

#[tokio::test]
async fn test_worker_runs_in_bot_dir() {
    let dir = TempDir::new().unwrap();
    let runner = runner(dir.path(), "pwd\nexec sleep 30\n");

    let handle = runner.launch_detached(&options("cwd")).await.unwrap();
    let log = wait_for_file(&runner.log_path("cwd")).await;
    let expected = dir.path().canonicalize().unwrap();
    assert_eq!(Path::new(log.trim()).canonicalize().unwrap(), expected);

    runner.stop(&handle, Duration::from_secs(5)).await.unwrap();
}

#[tokio::test]
async fn test_graceful_stop_is_fast() {
    let dir = TempDir::new().unwrap();
    let runner = runner(dir.path(), "exec sleep 30\n");

    let handle = runner.launch_detached(&options("graceful")).await.unwrap();
    let started = Instant::now();
    runner.stop(&handle, Duration::from_secs(5)).await.unwrap();

    // sleep dies on SIGTERM, well before the grace period ends.
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(!runner.is_running(&handle).await);
}

#[tokio::test]
async fn test_forced_kill_after_grace() {
    let dir = TempDir::new().unwrap();
    let runner = runner(
        dir.path(),
        "trap '' TERM\necho ready\nwhile true; do sleep 1; done\n",
    );

    let handle = runner.launch_detached(&options("stubborn")).await.unwrap();
    wait_for_file(&runner.log_path("stubborn")).await;

    let started = Instant::now();
    runner
        .stop(&handle, Duration::from_millis(300))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(5));
    assert!(!runner.is_running(&handle).await);
}

#[tokio::test]
async fn test_exited_worker_is_not_running() {
    let dir = TempDir::new().unwrap();
    let runner = runner(dir.path(), "exit 0\n");

    let handle = runner.launch_detached(&options("short")).await.unwrap();
    let mut running = true;
    for _ in 0..100 {
        if !runner.is_running(&handle).await {
            running = false;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!running);

    // Stopping a worker that already exited is fine.
    runner.stop(&handle, Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_missing_program() {
    let dir = TempDir::new().unwrap();
    let runner = ProcessRunner::new(ProcessRunnerConfig {
        program: "/nonexistent/worker-binary".to_string(),
        script: None,
        working_dir: dir.path().to_path_buf(),
        instances_dir: dir.path().join("instances"),
    });

    let err = runner.launch_detached(&options("missing")).await.unwrap_err();
    assert!(matches!(err, RunnerError::ProgramNotFound(_)));
}
