use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatch;
use crate::events::ProgressEvent;
use crate::AppState;

#[derive(Deserialize)]
struct ClientEvent {
    event: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    // The connection identity: progress events are addressed by this sid.
    let sid = Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();

    info!(%sid, "client connected");
    let welcome = ProgressEvent::welcome(&sid);
    if sink.send(Message::Text(welcome.to_frame())).await.is_err() {
        return;
    }

    // Forward broadcast events addressed to this connection.
    let rx = state.tx.subscribe();
    let forward_sid = sid.clone();
    let forward = tokio::spawn(async move {
        let mut events = BroadcastStream::new(rx);
        while let Some(received) = events.next().await {
            match received {
                Ok(event) if event.sid == forward_sid => {
                    if sink.send(Message::Text(event.to_frame())).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(_lag) => {
                    warn!(sid = %forward_sid, "event stream lagged");
                }
            }
        }
    });

    // Strategy 1 lives here: task start/cancel events from the client,
    // executed as cooperative tasks on this same process.
    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let Ok(client_event) = serde_json::from_str::<ClientEvent>(&text) else {
                    warn!(%sid, "unrecognized frame from client");
                    continue;
                };
                match client_event.event.as_str() {
                    "start_task" => {
                        info!(%sid, "received 'start_task' event");
                        dispatch::spawn_local_task(
                            &state,
                            sid.clone(),
                            state.cfg.default_iterations,
                        );
                    }
                    "cancel_task" => {
                        info!(%sid, "received 'cancel_task' event, setting flag");
                        if let Err(e) = state.cancel.set(&sid).await {
                            error!(%sid, error = %e, "failed to set cancellation flag");
                        }
                    }
                    other => warn!(%sid, event = other, "unknown client event"),
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!(%sid, "client disconnected");
    forward.abort();
}
