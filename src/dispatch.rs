//! The four front doors. All of them construct the same logical task; they
//! differ only in where and how the loop executes.
//!
//! 1. Inline cooperative — `start_task` over the real-time channel, spawned
//!    on the connection-holding process (`ws.rs` calls [`spawn_local_task`]).
//! 2. Detached-but-local — `GET /start-task2`, same spawn via a stateless
//!    request (`routes.rs` calls [`spawn_local_task`]).
//! 3. Blocking reference case — `GET /start-task3`, inline in the handler
//!    (`routes::start_task3`); deliberately not routed through here.
//! 4. Out-of-process queue — `GET /start-task4`, [`enqueue_task`] writes a
//!    typed job row for the worker process.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::bus::BroadcastSink;
use crate::task::{run_task, TaskContext};
use crate::AppState;

/// Job kinds the worker knows how to execute. The queue payload stays
/// data-only; this enum is the typed registry resolving it to a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    LongRun,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::LongRun => "long_run",
        }
    }

    pub fn parse(s: &str) -> Option<JobKind> {
        match s {
            "long_run" => Some(JobKind::LongRun),
            _ => None,
        }
    }
}

/// Arguments carried by a `long_run` job.
#[derive(Debug, Serialize, Deserialize)]
pub struct LongRunArgs {
    pub sid: String,
    pub total_iterations: u32,
}

/// Strategies 1 and 2: run the task loop as a cooperative tokio task on this
/// process, bounded by the overall execution timeout.
pub fn spawn_local_task(state: &AppState, sid: String, total_iterations: u32) {
    let ctx = TaskContext {
        sid: sid.clone(),
        cfg: state.task_config(total_iterations),
        cancel: state.cancel.clone(),
        sink: Arc::new(BroadcastSink::new(state.tx.clone())),
    };
    let timeout = state.cfg.task_timeout;
    let cancel = state.cancel.clone();

    tokio::spawn(async move {
        if tokio::time::timeout(timeout, run_task(ctx)).await.is_err() {
            // The loop's own cleanup was dropped with the future; the scratch
            // dir went with it, so only the flag needs a best-effort delete.
            error!(%sid, "task exceeded execution timeout");
            let _ = cancel.clear(&sid).await;
        }
    });
}

/// Strategy 4: serialize the task as a job for the out-of-process worker.
pub async fn enqueue_task(
    state: &AppState,
    sid: String,
    total_iterations: u32,
) -> rusqlite::Result<String> {
    let payload = serde_json::json!({
        "sid": sid,
        "total_iterations": total_iterations,
    })
    .to_string();
    let db = state.db.lock().await;
    db.enqueue_job(
        JobKind::LongRun.as_str(),
        &payload,
        state.cfg.job_timeout_secs,
    )
}
