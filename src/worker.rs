use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info};

use crate::bus::{OutboxSink, ProgressSink};
use crate::cancel::CancelStore;
use crate::config::Config;
use crate::db::{Database, Job};
use crate::dispatch::{JobKind, LongRunArgs};
use crate::task::{run_task, TaskConfig, TaskContext};

/// The out-of-process queue worker: polls the job table and executes each job
/// with the same task loop the local strategies use. It shares no memory or
/// connection with the front-end; progress reaches the client through the
/// outbox half of the progress channel.
pub async fn run_worker(db: Arc<Mutex<Database>>, cfg: Arc<Config>) {
    info!("worker started, polling for jobs");

    let cancel = CancelStore::new(db.clone(), cfg.cancel_ttl_secs);
    let sink: Arc<dyn ProgressSink> = Arc::new(OutboxSink::new(db.clone()));

    loop {
        let job = {
            let db = db.lock().await;
            match db.get_next_pending_job() {
                Ok(job) => job,
                Err(e) => {
                    error!(error = %e, "failed to fetch pending job");
                    None
                }
            }
        };

        let Some(job) = job else {
            sleep(cfg.worker_poll).await;
            continue;
        };

        info!(job_id = %job.id, kind = %job.kind, "processing job");
        {
            let db = db.lock().await;
            if let Err(e) = db.mark_job_running(&job.id) {
                error!(job_id = %job.id, error = %e, "failed to mark job running");
                continue;
            }
        }

        let result = match JobKind::parse(&job.kind) {
            Some(JobKind::LongRun) => execute_long_run(&job, &cancel, &sink, &cfg).await,
            None => Err(format!("unknown job kind: {}", job.kind)),
        };

        let db = db.lock().await;
        match result {
            Ok(status) => {
                if let Err(e) = db.mark_job_completed(&job.id, status) {
                    error!(job_id = %job.id, error = %e, "failed to mark job completed");
                } else {
                    info!(job_id = %job.id, status, "job completed");
                }
            }
            Err(message) => {
                error!(job_id = %job.id, error = %message, "job failed");
                let _ = db.mark_job_failed(&job.id, &message);
            }
        }
    }
}

async fn execute_long_run(
    job: &Job,
    cancel: &CancelStore,
    sink: &Arc<dyn ProgressSink>,
    cfg: &Config,
) -> Result<&'static str, String> {
    let args: LongRunArgs =
        serde_json::from_str(&job.payload).map_err(|e| format!("invalid job payload: {e}"))?;

    let ctx = TaskContext {
        sid: args.sid,
        cfg: TaskConfig {
            total_iterations: args.total_iterations,
            cpu_command: cfg.cpu_command.clone(),
            disk_command: cfg.disk_command.clone(),
            runner: crate::runner::RunnerOptions {
                poll_interval: cfg.poll_interval,
                grace_period: cfg.grace_period,
            },
        },
        cancel: cancel.clone(),
        sink: sink.clone(),
    };

    let timeout = Duration::from_secs(job.timeout_secs.max(0) as u64);
    match tokio::time::timeout(timeout, run_task(ctx)).await {
        Ok(status) => Ok(status.as_str()),
        Err(_) => Err(format!(
            "job exceeded its timeout of {}s",
            job.timeout_secs
        )),
    }
}
