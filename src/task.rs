//! The task loop and its per-iteration step coordinator.
//!
//! One implementation, shared by every dispatch strategy; the strategies
//! differ only in how they invoke it.

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::ProgressSink;
use crate::cancel::CancelStore;
use crate::error::TaskError;
use crate::events::ProgressEvent;
use crate::runner::{run_with_cancel, RunOutcome, RunnerOptions};

/// Terminal status of one task execution. The non-terminal lifecycle
/// (created, running) lives on the executing future's stack; only the
/// mutually exclusive outcome is observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Finished,
    Cancelled,
    Errored,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Finished => "finished",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Errored => "errored",
        }
    }
}

#[derive(Debug)]
pub enum StepOutcome {
    Cancelled,
    Completed { cpu_exit: i32, disk_exit: i32 },
}

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub total_iterations: u32,
    pub cpu_command: Vec<String>,
    /// `{out}` in any argument is replaced with the iteration's output file.
    pub disk_command: Vec<String>,
    pub runner: RunnerOptions,
}

pub struct TaskContext {
    pub sid: String,
    pub cfg: TaskConfig,
    pub cancel: CancelStore,
    pub sink: Arc<dyn ProgressSink>,
}

/// Run one iteration's unit of work: the CPU-bound and disk-I/O-bound
/// subprocesses, concurrently. Both are spawned before either is awaited and
/// completion is joined, not first-of. The iteration's scratch file is
/// removed on every path.
pub async fn run_step(
    sid: &str,
    iteration: u32,
    scratch: &Path,
    cfg: &TaskConfig,
    cancel: &CancelStore,
    sink: &Arc<dyn ProgressSink>,
) -> StepOutcome {
    let out_file = scratch.join(format!("disk_iter_{iteration}.bin"));
    let out_str = out_file.to_string_lossy().into_owned();
    let disk_command: Vec<String> = cfg
        .disk_command
        .iter()
        .map(|arg| arg.replace("{out}", &out_str))
        .collect();

    let cpu = spawn_runner(cfg.cpu_command.clone(), sid, cancel, sink, &cfg.runner);
    let disk = spawn_runner(disk_command, sid, cancel, sink, &cfg.runner);

    let cpu_outcome = join_outcome(cpu.await);
    let disk_outcome = join_outcome(disk.await);

    if let Err(e) = std::fs::remove_file(&out_file) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(%sid, file = %out_file.display(), error = %e, "could not remove iteration scratch file");
        }
    }

    match (cpu_outcome, disk_outcome) {
        (RunOutcome::Cancelled, _) | (_, RunOutcome::Cancelled) => StepOutcome::Cancelled,
        (cpu_outcome, disk_outcome) => StepOutcome::Completed {
            cpu_exit: exit_code(sid, "cpu", cpu_outcome),
            disk_exit: exit_code(sid, "disk", disk_outcome),
        },
    }
}

fn spawn_runner(
    command: Vec<String>,
    sid: &str,
    cancel: &CancelStore,
    sink: &Arc<dyn ProgressSink>,
    opts: &RunnerOptions,
) -> JoinHandle<RunOutcome> {
    let sid = sid.to_string();
    let cancel = cancel.clone();
    let sink = sink.clone();
    let opts = opts.clone();
    tokio::spawn(
        async move { run_with_cancel(&command, &sid, &cancel, sink.as_ref(), &opts).await },
    )
}

fn join_outcome(result: Result<RunOutcome, tokio::task::JoinError>) -> RunOutcome {
    result.unwrap_or_else(|e| RunOutcome::Error(format!("runner task panicked: {e}")))
}

fn exit_code(sid: &str, runner: &str, outcome: RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Exited(code) => code,
        RunOutcome::Error(detail) => {
            // Subprocess failures are non-fatal; the step counts as completed
            // with a failure code and the loop moves on.
            warn!(%sid, runner, %detail, "subprocess error, recording failed step");
            -1
        }
        RunOutcome::Cancelled => -1,
    }
}

/// Drive a task to its terminal state. Cleanup (scratch directory removal and
/// an unconditional flag delete) runs on every exit path, exactly once.
pub async fn run_task(ctx: TaskContext) -> TaskStatus {
    let scratch = match tempfile::Builder::new().prefix("longrun-task-").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            error!(sid = %ctx.sid, error = %e, "failed to create scratch directory");
            let _ = ctx.cancel.clear(&ctx.sid).await;
            return TaskStatus::Errored;
        }
    };

    let status = match run_task_inner(&ctx, scratch.path()).await {
        Ok(status) => status,
        Err(e) => {
            error!(sid = %ctx.sid, error = %e, "task failed");
            TaskStatus::Errored
        }
    };

    if let Err(e) = scratch.close() {
        warn!(sid = %ctx.sid, error = %e, "failed to remove scratch directory");
    }
    if let Err(e) = ctx.cancel.clear(&ctx.sid).await {
        warn!(sid = %ctx.sid, error = %e, "failed to clear cancellation flag");
    }

    info!(sid = %ctx.sid, status = status.as_str(), "task reached terminal state");
    status
}

async fn run_task_inner(ctx: &TaskContext, scratch: &Path) -> Result<TaskStatus, TaskError> {
    let total = ctx.cfg.total_iterations;
    if total < 1 {
        return Err(TaskError::InvalidIterations(total));
    }

    info!(sid = %ctx.sid, total_iterations = total, "task started");

    // A stale flag from a previous task for this sid must not cancel this one.
    ctx.cancel.clear(&ctx.sid).await?;
    ctx.sink.emit(ProgressEvent::started(&ctx.sid)).await;
    ctx.sink.emit(ProgressEvent::progress(&ctx.sid, 0)).await;

    for iteration in 1..=total {
        if ctx.cancel.take(&ctx.sid).await? {
            info!(sid = %ctx.sid, iteration, "cancellation observed before iteration");
            ctx.sink.emit(ProgressEvent::cancelled(&ctx.sid)).await;
            return Ok(TaskStatus::Cancelled);
        }

        match run_step(
            &ctx.sid,
            iteration,
            scratch,
            &ctx.cfg,
            &ctx.cancel,
            &ctx.sink,
        )
        .await
        {
            StepOutcome::Cancelled => {
                // The runner that observed the flag already sent the notification.
                info!(sid = %ctx.sid, iteration, "cancellation observed during iteration");
                return Ok(TaskStatus::Cancelled);
            }
            StepOutcome::Completed {
                cpu_exit,
                disk_exit,
            } => {
                info!(sid = %ctx.sid, iteration, cpu_exit, disk_exit, "iteration finished");
            }
        }

        let percent = (100 * iteration / total) as u8;
        ctx.sink.emit(ProgressEvent::progress(&ctx.sid, percent)).await;
    }

    ctx.sink.emit(ProgressEvent::finished(&ctx.sid, total)).await;
    Ok(TaskStatus::Finished)
}
