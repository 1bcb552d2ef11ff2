//! Web server module.

mod handlers;

pub use handlers::*;

use crate::config::DashboardConfig;
use crate::pipeline::Pipeline;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DashboardConfig>,
    pub pipeline: Arc<Pipeline>,
}

/// Web server for the dashboard.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: Arc<DashboardConfig>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            state: AppState { config, pipeline },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Dashboard
            .route("/", get(handlers::handle_dashboard))
            // Query API
            .route("/api/series", get(handlers::handle_get_series))
            .route("/api/summary", get(handlers::handle_get_summary))
            .route("/api/dns-failures", get(handlers::handle_get_dns_failures))
            .route("/api/targets", get(handlers::handle_get_targets))
            // Refresh
            .route("/api/status", get(handlers::handle_get_status))
            .route("/api/refresh", post(handlers::handle_refresh))
            // Static assets
            .route("/static/{*path}", get(handlers::handle_static))
            .route("/favicon.ico", get(handlers::handle_favicon))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the server on the configured address.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = format!("{}:{}", self.state.config.app_host, self.state.config.app_port);
        let router = self.routes();

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Web server listening on {}", listener.local_addr()?);

        axum::serve(listener, router).await?;

        Ok(())
    }
}
