use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

pub mod bus;
pub mod cancel;
pub mod config;
pub mod cron;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod routes;
pub mod runner;
pub mod task;
pub mod worker;
pub mod ws;

use cancel::CancelStore;
use config::Config;
use db::Database;
use events::ProgressEvent;
use runner::RunnerOptions;
use task::TaskConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub tx: broadcast::Sender<ProgressEvent>,
    pub cancel: CancelStore,
    pub cfg: Arc<Config>,
}

impl AppState {
    pub fn new(
        db: Arc<Mutex<Database>>,
        tx: broadcast::Sender<ProgressEvent>,
        cfg: Arc<Config>,
    ) -> Self {
        let cancel = CancelStore::new(db.clone(), cfg.cancel_ttl_secs);
        Self {
            db,
            tx,
            cancel,
            cfg,
        }
    }

    /// Task configuration for one execution, with the iteration count
    /// resolved by the caller (run record, default, or client input).
    pub fn task_config(&self, total_iterations: u32) -> TaskConfig {
        TaskConfig {
            total_iterations,
            cpu_command: self.cfg.cpu_command.clone(),
            disk_command: self.cfg.disk_command.clone(),
            runner: RunnerOptions {
                poll_interval: self.cfg.poll_interval,
                grace_period: self.cfg.grace_period,
            },
        }
    }
}
