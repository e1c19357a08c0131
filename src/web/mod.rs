//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::scheduler::Scheduler;
use crate::stats::StatsAggregator;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
    pub stats: StatsAggregator,
}

/// JSON API server for targets, settings and stats.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<Store>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            state: AppState {
                config,
                stats: StatsAggregator::new(store.clone()),
                store,
                scheduler,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            // Targets
            .route(
                "/api/targets",
                get(handlers::handle_get_targets).post(handlers::handle_create_target),
            )
            .route("/api/targets/regions", get(handlers::handle_get_regions))
            .route("/api/targets/batch-delete", post(handlers::handle_batch_delete_targets))
            .route(
                "/api/targets/{id}",
                get(handlers::handle_get_target)
                    .put(handlers::handle_update_target)
                    .delete(handlers::handle_delete_target),
            )
            .route("/api/targets/{id}/toggle-status", patch(handlers::handle_toggle_target))
            // Settings
            .route(
                "/api/settings/probe-interval",
                get(handlers::handle_get_probe_interval).post(handlers::handle_set_probe_interval),
            )
            .route(
                "/api/settings/task-status",
                get(handlers::handle_get_task_status).post(handlers::handle_set_task_status),
            )
            // Probing and reporting
            .route("/api/probe/run", post(handlers::handle_run_cycle))
            .route("/api/stats", get(handlers::handle_get_stats))
            .route("/api/stats/summary", get(handlers::handle_get_summary))
            .route("/api/results", get(handlers::handle_get_results))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
