use std::sync::Arc;

use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use longrun_server::config::Config;
use longrun_server::db::Database;
use longrun_server::worker;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting longrun-worker...");

    let cfg = Arc::new(Config::from_env());
    let db = Database::new(&cfg.db_path).expect("Failed to initialize database");

    worker::run_worker(Arc::new(Mutex::new(db)), cfg).await;
}
