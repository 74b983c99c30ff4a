use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use longrun_server::config::Config;
use longrun_server::db::Database;
use longrun_server::{bus, cron, routes, AppState};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting longrun-server...");

    let cfg = Arc::new(Config::from_env());
    let db = Database::new(&cfg.db_path).expect("Failed to initialize database");
    let db = Arc::new(Mutex::new(db));

    // Progress events fan out through this channel; per-connection tasks
    // filter by sid.
    let (tx, _rx) = broadcast::channel(100);

    // Bridge for events written by the worker process.
    tokio::spawn(bus::run_outbox_relay(db.clone(), tx.clone(), cfg.relay_poll));

    tokio::spawn(cron::run_gc(db.clone(), cfg.gc_interval));

    let state = AppState::new(db, tx, cfg.clone());
    let app = routes::router(state);

    let addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
