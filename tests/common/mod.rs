#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use longrun_server::config::Config;
use longrun_server::db::Database;
use longrun_server::events::ProgressEvent;
use longrun_server::runner::RunnerOptions;
use longrun_server::task::TaskConfig;

pub fn test_db() -> (tempfile::TempDir, Arc<Mutex<Database>>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let db = Database::new(path.to_str().unwrap()).unwrap();
    (dir, Arc::new(Mutex::new(db)))
}

pub fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

pub fn fast_runner() -> RunnerOptions {
    RunnerOptions {
        poll_interval: Duration::from_millis(20),
        grace_period: Duration::from_millis(100),
    }
}

/// Iterations complete in tens of milliseconds.
pub fn quick_task_config(total_iterations: u32) -> TaskConfig {
    TaskConfig {
        total_iterations,
        cpu_command: sh("sleep 0.05"),
        disk_command: sh("touch {out}; sleep 0.05"),
        runner: fast_runner(),
    }
}

/// Iterations hang until cancelled.
pub fn slow_task_config(total_iterations: u32) -> TaskConfig {
    TaskConfig {
        total_iterations,
        cpu_command: sh("sleep 30"),
        disk_command: sh("touch {out}; sleep 30"),
        runner: fast_runner(),
    }
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        db_path: "unused".to_string(),
        cancel_ttl_secs: 600,
        poll_interval: Duration::from_millis(20),
        grace_period: Duration::from_millis(100),
        task_timeout: Duration::from_secs(60),
        job_timeout_secs: 60,
        worker_poll: Duration::from_millis(50),
        relay_poll: Duration::from_millis(20),
        gc_interval: Duration::from_secs(3600),
        default_iterations: 2,
        cpu_command: sh("sleep 0.05"),
        disk_command: sh("touch {out}; sleep 0.05"),
    }
}

/// Drain everything currently buffered on the receiver.
pub fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn percents(events: &[ProgressEvent]) -> Vec<u64> {
    events
        .iter()
        .filter(|e| e.event == longrun_server::events::TASK_PROGRESS)
        .map(|e| e.payload["percent"].as_u64().unwrap())
        .collect()
}
