use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::ProgressEvent;

/// A run record: configuration input for a task (CRUD only, no live state).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: i64,
    pub total_iterations: u32,
    pub run_name: String,
}

/// A queued job picked up by the out-of-process worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub payload: String,
    pub status: String,
    pub timeout_secs: i64,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database and ensure the schema exists. WAL mode
    /// so the front-end and worker processes can share the file.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS runs (
                run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                total_iterations INTEGER NOT NULL,
                run_name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cancel_flags (
                sid TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                timeout_secs INTEGER NOT NULL DEFAULT 3600,
                result TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

            CREATE TABLE IF NOT EXISTS progress_outbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sid TEXT NOT NULL,
                event TEXT NOT NULL,
                payload TEXT NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_outbox_delivered ON progress_outbox(delivered, id);
            "#,
        )?;

        Ok(Database { conn })
    }

    // === Run records ===

    pub fn create_run(&self, total_iterations: u32, run_name: &str) -> Result<Run> {
        self.conn.execute(
            "INSERT INTO runs (total_iterations, run_name) VALUES (?1, ?2)",
            params![total_iterations, run_name],
        )?;
        let run_id = self.conn.last_insert_rowid();
        Ok(Run {
            run_id,
            total_iterations,
            run_name: run_name.to_string(),
        })
    }

    pub fn get_run(&self, run_id: i64) -> Result<Option<Run>> {
        self.conn
            .query_row(
                "SELECT run_id, total_iterations, run_name FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(Run {
                        run_id: row.get(0)?,
                        total_iterations: row.get(1)?,
                        run_name: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn list_runs(&self) -> Result<Vec<Run>> {
        let mut stmt = self
            .conn
            .prepare("SELECT run_id, total_iterations, run_name FROM runs ORDER BY run_id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Run {
                run_id: row.get(0)?,
                total_iterations: row.get(1)?,
                run_name: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn update_total_iterations(&self, run_id: i64, total_iterations: u32) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE runs SET total_iterations = ?1 WHERE run_id = ?2",
            params![total_iterations, run_id],
        )?;
        Ok(changed == 1)
    }

    pub fn update_run_name(&self, run_id: i64, run_name: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE runs SET run_name = ?1 WHERE run_id = ?2",
            params![run_name, run_id],
        )?;
        Ok(changed == 1)
    }

    // === Cancellation flags ===

    pub fn set_cancel_flag(&self, sid: &str, ttl_secs: i64) -> Result<()> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT OR REPLACE INTO cancel_flags (sid, expires_at, created_at) VALUES (?1, ?2, ?3)",
            params![sid, now.timestamp() + ttl_secs, now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn cancel_flag_set(&self, sid: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM cancel_flags WHERE sid = ?1 AND expires_at > ?2",
                params![sid, Utc::now().timestamp()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Atomically consume the flag. The affected-row count is the commit
    /// point for cancellation notification: of any number of concurrent
    /// observers, exactly one sees `true`.
    pub fn take_cancel_flag(&self, sid: &str) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM cancel_flags WHERE sid = ?1 AND expires_at > ?2",
            params![sid, Utc::now().timestamp()],
        )?;
        Ok(deleted > 0)
    }

    /// Unconditional delete; a no-op when the flag is already absent.
    pub fn clear_cancel_flag(&self, sid: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM cancel_flags WHERE sid = ?1", params![sid])?;
        Ok(())
    }

    pub fn purge_expired_flags(&self) -> Result<usize> {
        self.conn.execute(
            "DELETE FROM cancel_flags WHERE expires_at <= ?1",
            params![Utc::now().timestamp()],
        )
    }

    // === Job queue ===

    pub fn enqueue_job(&self, kind: &str, payload: &str, timeout_secs: i64) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO jobs (id, kind, payload, status, timeout_secs, created_at)
             VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
            params![id, kind, payload, timeout_secs, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    pub fn get_next_pending_job(&self) -> Result<Option<Job>> {
        self.conn
            .query_row(
                "SELECT id, kind, payload, status, timeout_secs, result, error,
                        created_at, started_at, completed_at
                 FROM jobs WHERE status = 'pending' ORDER BY rowid ASC LIMIT 1",
                [],
                Self::job_from_row,
            )
            .optional()
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        self.conn
            .query_row(
                "SELECT id, kind, payload, status, timeout_secs, result, error,
                        created_at, started_at, completed_at
                 FROM jobs WHERE id = ?1",
                params![id],
                Self::job_from_row,
            )
            .optional()
    }

    pub fn mark_job_running(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET status = 'running', started_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn mark_job_completed(&self, id: &str, result: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET status = 'completed', result = ?1, completed_at = ?2 WHERE id = ?3",
            params![result, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    pub fn mark_job_failed(&self, id: &str, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET status = 'failed', error = ?1, completed_at = ?2 WHERE id = ?3",
            params![error, Utc::now().to_rfc3339(), id],
        )?;
        Ok(())
    }

    // === Progress outbox ===

    pub fn insert_outbox_event(&self, event: &ProgressEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO progress_outbox (sid, event, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.sid,
                event.event,
                event.payload.to_string(),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Fetch the oldest undelivered events (in emission order) and mark them
    /// delivered.
    pub fn take_undelivered_events(&self, limit: usize) -> Result<Vec<ProgressEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, sid, event, payload FROM progress_outbox
             WHERE delivered = 0 ORDER BY id ASC LIMIT ?1",
        )?;
        let rows: Vec<(i64, ProgressEvent)> = stmt
            .query_map(params![limit as i64], |row| {
                let id: i64 = row.get(0)?;
                let sid: String = row.get(1)?;
                let event: String = row.get(2)?;
                let payload: String = row.get(3)?;
                Ok((id, sid, event, payload))
            })?
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .map(|(id, sid, event, payload)| {
                let payload = serde_json::from_str(&payload)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                (id, ProgressEvent { sid, event, payload })
            })
            .collect();

        for (id, _) in &rows {
            self.conn.execute(
                "UPDATE progress_outbox SET delivered = 1 WHERE id = ?1",
                params![id],
            )?;
        }

        Ok(rows.into_iter().map(|(_, ev)| ev).collect())
    }

    pub fn purge_delivered_events(&self) -> Result<usize> {
        self.conn
            .execute("DELETE FROM progress_outbox WHERE delivered = 1", [])
    }

    fn job_from_row(row: &rusqlite::Row<'_>) -> Result<Job> {
        Ok(Job {
            id: row.get(0)?,
            kind: row.get(1)?,
            payload: row.get(2)?,
            status: row.get(3)?,
            timeout_secs: row.get(4)?,
            result: row.get(5)?,
            error: row.get(6)?,
            created_at: row.get(7)?,
            started_at: row.get(8)?,
            completed_at: row.get(9)?,
        })
    }
}
