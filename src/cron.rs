use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{error, info};

use crate::db::Database;

/// Periodic GC: expired cancellation flags (the self-heal for flags nobody
/// observed) and outbox rows that have already been delivered.
pub async fn run_gc(db: Arc<Mutex<Database>>, every: Duration) {
    info!("GC task started");
    let mut ticker = interval(every);

    loop {
        ticker.tick().await;

        let db = db.lock().await;

        match db.purge_expired_flags() {
            Ok(purged) if purged > 0 => {
                info!(purged, "removed expired cancellation flags");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to purge expired cancellation flags"),
        }

        match db.purge_delivered_events() {
            Ok(purged) if purged > 0 => {
                info!(purged, "removed delivered outbox events");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to purge delivered outbox events"),
        }
    }
}
