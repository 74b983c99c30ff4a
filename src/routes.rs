use axum::extract::{Path, Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::db::Run;
use crate::dispatch;
use crate::error::ApiError;
use crate::events::ProgressEvent;
use crate::AppState;

/// Iteration count for the blocking reference case; deliberately smaller
/// than the default since the handler thread is unusable for the duration.
const BLOCKING_ITERATIONS: u32 = 20;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ws", get(crate::ws::ws_handler))
        .route("/start-task2", get(start_task2))
        .route("/start-task3", get(start_task3))
        .route("/start-task4", get(start_task4))
        .route("/cancel-task", get(cancel_task))
        .route("/api/runs", get(list_runs).post(create_run))
        .route("/api/runs/:id", get(get_run).put(update_run))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn health() -> Json<Value> {
    Json(json!({ "Status": "Ok" }))
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Deserialize)]
pub struct StartQuery {
    pub sid: Option<String>,
    pub run_id: Option<i64>,
}

// === Dispatch strategies ===

/// Strategy 2: detached-but-local. Same execution semantics as the
/// channel-triggered strategy, initiated via a stateless request.
pub async fn start_task2(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
) -> Result<Json<Value>, ApiError> {
    let sid = require_sid(&query)?;
    let total = resolve_iterations(&state, query.run_id, state.cfg.default_iterations).await?;

    info!(%sid, "received HTTP request for /start-task2");
    dispatch::spawn_local_task(&state, sid, total);
    Ok(Json(json!({
        "message": "Your long-running task has been started via HTTP."
    })))
}

/// Strategy 3: the blocking reference case. The whole task runs synchronously
/// inside the request-response cycle with plain blocking subprocess calls, so
/// this worker thread is unresponsive to every other request (including
/// /cancel-task) until the final iteration completes. Kept as a demonstrated
/// anti-pattern.
pub async fn start_task3(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
) -> Result<Json<Value>, ApiError> {
    let sid = require_sid(&query)?;
    let total = match query.run_id {
        Some(_) => resolve_iterations(&state, query.run_id, BLOCKING_ITERATIONS).await?,
        None => BLOCKING_ITERATIONS,
    };

    warn!(%sid, "starting INTENTIONALLY BLOCKING task; this thread will not serve other requests until it completes");
    let _ = state.tx.send(ProgressEvent::started(&sid));

    let scratch = tempfile::Builder::new()
        .prefix("blocking-task-")
        .tempdir()
        .map_err(|e| ApiError::internal(format!("An error occurred in the blocking task: {e}")))?;

    for iteration in 1..=total {
        let out_file = scratch.path().join(format!("disk_iter_{iteration}.bin"));
        let out_str = out_file.to_string_lossy().into_owned();

        // The blocking calls, one after the other. Cancellation checks would
        // be pointless: while blocked, this thread could never have processed
        // an incoming /cancel-task request in the first place.
        run_blocking(&state.cfg.cpu_command, &out_str)?;
        run_blocking(&state.cfg.disk_command, &out_str)?;

        let _ = std::fs::remove_file(&out_file);

        let percent = (100 * iteration / total) as u8;
        let _ = state.tx.send(ProgressEvent::progress(&sid, percent));
        info!(%sid, iteration, percent, "blocking task progress");
    }

    info!(%sid, "blocking task finished, sending final HTTP response");
    Ok(Json(json!({
        "message": format!("The blocking task is finally complete after {total} iterations.")
    })))
}

/// Strategy 4: enqueue for the out-of-process worker.
pub async fn start_task4(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
) -> Result<Json<Value>, ApiError> {
    let sid = require_sid(&query)?;
    let total = resolve_iterations(&state, query.run_id, state.cfg.default_iterations).await?;

    info!(%sid, "received HTTP request for /start-task4");
    let job_id = dispatch::enqueue_task(&state, sid, total)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to enqueue job");
            ApiError::internal("Failed to enqueue the task.")
        })?;

    Ok(Json(json!({
        "message": "Your long-running task has been queued.",
        "job_id": job_id
    })))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Query(query): Query<StartQuery>,
) -> Result<Json<Value>, ApiError> {
    let sid = require_sid(&query)?;

    info!(%sid, "received HTTP request to /cancel-task, setting flag");
    state.cancel.set(&sid).await.map_err(|e| {
        error!(error = %e, "failed to set cancellation flag");
        ApiError::internal("Failed to record the cancellation request.")
    })?;
    Ok(Json(json!({ "message": "Cancellation signal sent." })))
}

// === Run records ===

#[derive(Deserialize)]
pub struct RunPayload {
    pub total_iterations: Option<u32>,
    pub run_name: Option<String>,
}

pub async fn list_runs(State(state): State<AppState>) -> Result<Json<Vec<Run>>, ApiError> {
    let db = state.db.lock().await;
    db.list_runs().map(Json).map_err(internal("list runs"))
}

pub async fn create_run(
    State(state): State<AppState>,
    Json(req): Json<RunPayload>,
) -> Result<Json<Run>, ApiError> {
    let db = state.db.lock().await;
    db.create_run(
        req.total_iterations.unwrap_or(50),
        req.run_name.as_deref().unwrap_or(""),
    )
    .map(Json)
    .map_err(internal("create run"))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
) -> Result<Json<Run>, ApiError> {
    let db = state.db.lock().await;
    match db.get_run(run_id).map_err(internal("get run"))? {
        Some(run) => Ok(Json(run)),
        None => Err(ApiError::not_found(format!("No run with id {run_id}."))),
    }
}

pub async fn update_run(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Json(req): Json<RunPayload>,
) -> Result<Json<Run>, ApiError> {
    let db = state.db.lock().await;

    if let Some(total) = req.total_iterations {
        if !db
            .update_total_iterations(run_id, total)
            .map_err(internal("update run"))?
        {
            return Err(ApiError::not_found(format!("No run with id {run_id}.")));
        }
    }
    if let Some(name) = &req.run_name {
        if !db.update_run_name(run_id, name).map_err(internal("update run"))? {
            return Err(ApiError::not_found(format!("No run with id {run_id}.")));
        }
    }

    match db.get_run(run_id).map_err(internal("get run"))? {
        Some(run) => Ok(Json(run)),
        None => Err(ApiError::not_found(format!("No run with id {run_id}."))),
    }
}

// === Helpers ===

fn require_sid(query: &StartQuery) -> Result<String, ApiError> {
    query
        .sid
        .clone()
        .filter(|sid| !sid.is_empty())
        .ok_or_else(|| ApiError::bad_request("Error: SID is required."))
}

async fn resolve_iterations(
    state: &AppState,
    run_id: Option<i64>,
    default: u32,
) -> Result<u32, ApiError> {
    let Some(run_id) = run_id else {
        return Ok(default);
    };
    let db = state.db.lock().await;
    match db.get_run(run_id).map_err(internal("get run"))? {
        Some(run) => Ok(run.total_iterations),
        None => Err(ApiError::bad_request(format!(
            "Error: unknown run_id {run_id}."
        ))),
    }
}

fn run_blocking(command: &[String], out: &str) -> Result<(), ApiError> {
    let resolved: Vec<String> = command.iter().map(|arg| arg.replace("{out}", out)).collect();
    let Some((program, args)) = resolved.split_first() else {
        return Err(ApiError::internal("An error occurred in the blocking task: empty command"));
    };
    // Non-zero exit codes are not failures here, only spawn errors are.
    std::process::Command::new(program)
        .args(args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map_err(|e| ApiError::internal(format!("An error occurred in the blocking task: {e}")))?;
    Ok(())
}

fn internal(action: &'static str) -> impl Fn(rusqlite::Error) -> ApiError {
    move |e| {
        error!(error = %e, "database error during {action}");
        ApiError::internal("Internal database error.")
    }
}

// UI page is out of scope; this placeholder exercises the channel manually.
const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>longrun-server</title></head>
<body>
  <h1>longrun-server</h1>
  <p>sid: <code id="sid">connecting...</code></p>
  <button onclick="send('start_task')">start (ws)</button>
  <button onclick="send('cancel_task')">cancel (ws)</button>
  <pre id="log"></pre>
  <script>
    const log = (line) => {
      document.getElementById('log').textContent += line + "\n";
    };
    const ws = new WebSocket(`ws://${location.host}/ws`);
    const send = (event) => ws.send(JSON.stringify({ event }));
    ws.onmessage = (msg) => {
      const frame = JSON.parse(msg.data);
      if (frame.event === 'server_welcome') {
        document.getElementById('sid').textContent = frame.payload.sid;
      }
      log(`${frame.event} ${JSON.stringify(frame.payload)}`);
    };
  </script>
</body>
</html>
"#;
