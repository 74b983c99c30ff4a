use std::time::Duration;

/// Process configuration, resolved from the environment once at startup and
/// passed into components by injection.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    /// Lifetime of a cancellation flag; self-heals flags that are never observed.
    pub cancel_ttl_secs: i64,
    /// Subprocess exit-status polling interval.
    pub poll_interval: Duration,
    /// Grace period between SIGTERM and SIGKILL on cancellation.
    pub grace_period: Duration,
    /// Overall execution timeout for locally dispatched tasks.
    pub task_timeout: Duration,
    /// Timeout recorded on enqueued jobs, enforced by the worker.
    pub job_timeout_secs: i64,
    /// Idle sleep between job-table polls in the worker loop.
    pub worker_poll: Duration,
    /// Outbox drain interval on the front-end.
    pub relay_poll: Duration,
    /// GC interval for expired flags and delivered outbox rows.
    pub gc_interval: Duration,
    pub default_iterations: u32,
    /// CPU-bound workload for one iteration step.
    pub cpu_command: Vec<String>,
    /// Disk-I/O-bound workload for one iteration step; `{out}` is replaced
    /// with the iteration's scratch file path.
    pub disk_command: Vec<String>,
}

impl Config {
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3001);
        let db_path =
            std::env::var("LONGRUN_DB").unwrap_or_else(|_| "longrun_server.db".to_string());
        let task_timeout_secs: u64 = std::env::var("LONGRUN_TASK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3600);
        let default_iterations = std::env::var("LONGRUN_TOTAL_ITERATIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(50);

        Self {
            port,
            db_path,
            cancel_ttl_secs: 600,
            poll_interval: Duration::from_millis(200),
            grace_period: Duration::from_millis(500),
            task_timeout: Duration::from_secs(task_timeout_secs),
            job_timeout_secs: task_timeout_secs as i64,
            worker_poll: Duration::from_millis(1000),
            relay_poll: Duration::from_millis(200),
            gc_interval: Duration::from_secs(60),
            default_iterations,
            cpu_command: default_cpu_command(),
            disk_command: default_disk_command(),
        }
    }
}

pub fn default_cpu_command() -> Vec<String> {
    to_command(&["openssl", "speed", "-evp", "aes-256-cbc", "-multi", "10"])
}

pub fn default_disk_command() -> Vec<String> {
    to_command(&[
        "dd",
        "if=/dev/zero",
        "of={out}",
        "bs=1M",
        "count=1024",
        "oflag=direct",
    ])
}

fn to_command(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}
