//! Cancellable subprocess execution.
//!
//! A child is spawned without blocking the runtime, then its exit status is
//! polled on a fixed interval. Each poll also checks the cancellation flag;
//! when the flag is set the child gets SIGTERM, a grace period, then SIGKILL
//! if it is still running. The atomic flag take decides which of several
//! concurrent runners emits the `task_cancelled` notification.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::bus::ProgressSink;
use crate::cancel::CancelStore;
use crate::events::ProgressEvent;

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Exit-status polling interval.
    pub poll_interval: Duration,
    /// Wait between graceful terminate and forced kill.
    pub grace_period: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            grace_period: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Exited(i32),
    Cancelled,
    Error(String),
}

/// Run one command to a terminal state, polling the cancellation flag for
/// `sid` between exit-status checks.
pub async fn run_with_cancel(
    command: &[String],
    sid: &str,
    cancel: &CancelStore,
    sink: &dyn ProgressSink,
    opts: &RunnerOptions,
) -> RunOutcome {
    let Some((program, args)) = command.split_first() else {
        return RunOutcome::Error("empty command".to_string());
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return RunOutcome::Error(format!("spawning '{program}': {e}")),
    };

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let code = status.code().unwrap_or(-1);
                info!(%sid, cmd = %program, exit_code = code, "subprocess exited");
                return RunOutcome::Exited(code);
            }
            Ok(None) => {}
            Err(e) => {
                // No process leaks: make sure the child is dead before reporting.
                let _ = child.kill().await;
                return RunOutcome::Error(format!("waiting on '{program}': {e}"));
            }
        }

        match cancel.is_set(sid).await {
            Ok(true) => {
                info!(%sid, cmd = %program, pid = ?child.id(), "cancel flag observed, terminating subprocess");
                terminate(&mut child);
                sleep(opts.grace_period).await;
                if let Ok(None) = child.try_wait() {
                    warn!(%sid, cmd = %program, "subprocess survived SIGTERM, killing");
                    let _ = child.kill().await;
                }

                match cancel.take(sid).await {
                    // First observer wins the notification.
                    Ok(true) => sink.emit(ProgressEvent::cancelled(sid)).await,
                    Ok(false) => {}
                    Err(e) => warn!(%sid, error = %e, "failed to consume cancel flag"),
                }
                return RunOutcome::Cancelled;
            }
            Ok(false) => {}
            Err(e) => warn!(%sid, error = %e, "cancel flag check failed"),
        }

        sleep(opts.poll_interval).await;
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    // No graceful signal available; the follow-up kill after the grace
    // period is the only escalation.
    let _ = child.start_kill();
}
