//! Progress-event delivery.
//!
//! In-process dispatch strategies emit straight onto the broadcast channel
//! that connected clients subscribe to. The out-of-process worker has no such
//! channel; it writes rows to the `progress_outbox` table and the front-end's
//! relay loop drains them onto its local channel, so an event always reaches
//! whichever process currently holds the target client's connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error};

use crate::db::Database;
use crate::events::ProgressEvent;

/// Where a task emits its progress events. Emission is fire-and-forget:
/// delivery failures are logged, never propagated into the task loop.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, event: ProgressEvent);
}

/// Direct in-process fan-out.
pub struct BroadcastSink {
    tx: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProgressSink for BroadcastSink {
    async fn emit(&self, event: ProgressEvent) {
        // Send fails only when no client is subscribed; the event is moot then.
        let _ = self.tx.send(event);
    }
}

/// Cross-process delivery via the outbox table.
pub struct OutboxSink {
    db: Arc<Mutex<Database>>,
}

impl OutboxSink {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ProgressSink for OutboxSink {
    async fn emit(&self, event: ProgressEvent) {
        let db = self.db.lock().await;
        if let Err(e) = db.insert_outbox_event(&event) {
            error!(sid = %event.sid, event = %event.event, error = %e, "failed to write outbox event");
        }
    }
}

/// Front-end relay: drain undelivered outbox rows onto the local broadcast
/// channel, in emission order.
pub async fn run_outbox_relay(
    db: Arc<Mutex<Database>>,
    tx: broadcast::Sender<ProgressEvent>,
    poll: Duration,
) {
    debug!("outbox relay started");
    let mut interval = tokio::time::interval(poll);
    loop {
        interval.tick().await;

        let batch = {
            let db = db.lock().await;
            db.take_undelivered_events(64)
        };

        match batch {
            Ok(events) => {
                for event in events {
                    let _ = tx.send(event);
                }
            }
            Err(e) => error!(error = %e, "failed to drain progress outbox"),
        }
    }
}
