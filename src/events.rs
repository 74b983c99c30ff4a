use serde::{Deserialize, Serialize};
use serde_json::json;

pub const SERVER_WELCOME: &str = "server_welcome";
pub const TASK_STARTED: &str = "task_started";
pub const TASK_PROGRESS: &str = "task_progress";
pub const TASK_CANCELLED: &str = "task_cancelled";
pub const TASK_FINISHED: &str = "task_finished";

/// A progress event addressed to one client. `sid` routes the event; the
/// wire frame a client sees is `{"event": ..., "payload": ...}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub sid: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl ProgressEvent {
    pub fn welcome(sid: &str) -> Self {
        Self {
            sid: sid.to_string(),
            event: SERVER_WELCOME.to_string(),
            payload: json!({
                "message": format!("Welcome! Your SID {sid} has been assigned."),
                "sid": sid,
            }),
        }
    }

    pub fn started(sid: &str) -> Self {
        Self {
            sid: sid.to_string(),
            event: TASK_STARTED.to_string(),
            payload: json!({ "status": "Your background task has been initiated." }),
        }
    }

    pub fn progress(sid: &str, percent: u8) -> Self {
        Self {
            sid: sid.to_string(),
            event: TASK_PROGRESS.to_string(),
            payload: json!({ "percent": percent }),
        }
    }

    pub fn cancelled(sid: &str) -> Self {
        Self {
            sid: sid.to_string(),
            event: TASK_CANCELLED.to_string(),
            payload: json!({ "status": "Task was cancelled by user." }),
        }
    }

    pub fn finished(sid: &str, total_iterations: u32) -> Self {
        Self {
            sid: sid.to_string(),
            event: TASK_FINISHED.to_string(),
            payload: json!({
                "status": format!("Task completed all {total_iterations} iterations.")
            }),
        }
    }

    /// Wire frame sent over the real-time channel.
    pub fn to_frame(&self) -> String {
        json!({ "event": self.event, "payload": self.payload }).to_string()
    }
}
