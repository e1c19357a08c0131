//! tcpwatch - TCP reachability and latency monitor
//!
//! Periodically opens TCP connections to registered endpoints, stores each
//! outcome in SQLite and serves summaries over a JSON API.

mod config;
mod db;
mod probe;
mod scheduler;
mod stats;
mod web;

use config::ServerConfig;
use db::Store;
use probe::TcpProber;
use scheduler::{ScheduleControl, Scheduler};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("tcpwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting tcpwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let control = Arc::new(ScheduleControl::load(store.clone(), cfg.default_interval_secs)?);
    let prober = Arc::new(TcpProber::new(cfg.probe_timeout).with_jitter(cfg.probe_jitter));
    tracing::info!(
        "Probe timeout {:?}, at most {} probes in flight",
        prober.timeout(),
        cfg.max_concurrent_probes
    );

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(store.clone(), prober, control, &cfg));
    scheduler.start().await?;

    // Start web server
    let server = Server::new(cfg, store, scheduler.clone());
    server.start().await?;

    scheduler.shutdown().await;
    Ok(())
}
