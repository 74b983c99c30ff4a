//! Cancellation flags, shared across processes through the database.
//!
//! Absence means "not cancelled"; presence means "cancel requested". Every
//! flag carries an expiry so an unobserved flag self-heals. `take` is the
//! notification commit point: whichever observer's delete reports that the
//! row existed is the one that emits `task_cancelled`.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::Database;

#[derive(Clone)]
pub struct CancelStore {
    db: Arc<Mutex<Database>>,
    ttl_secs: i64,
}

impl CancelStore {
    pub fn new(db: Arc<Mutex<Database>>, ttl_secs: i64) -> Self {
        Self { db, ttl_secs }
    }

    /// Request cancellation for `sid`.
    pub async fn set(&self, sid: &str) -> rusqlite::Result<()> {
        let db = self.db.lock().await;
        db.set_cancel_flag(sid, self.ttl_secs)
    }

    /// Non-consuming check, used on each subprocess poll.
    pub async fn is_set(&self, sid: &str) -> rusqlite::Result<bool> {
        let db = self.db.lock().await;
        db.cancel_flag_set(sid)
    }

    /// Consume the flag; `true` for exactly one of any concurrent callers.
    pub async fn take(&self, sid: &str) -> rusqlite::Result<bool> {
        let db = self.db.lock().await;
        db.take_cancel_flag(sid)
    }

    /// Unconditional cleanup delete; no-op when the flag is absent.
    pub async fn clear(&self, sid: &str) -> rusqlite::Result<()> {
        let db = self.db.lock().await;
        db.clear_cancel_flag(sid)
    }
}
