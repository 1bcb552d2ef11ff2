//! monitor-io dashboard - network performance viewer
//!
//! Pulls the CSV exports of a monitor-io device, reshapes them into one
//! table and serves charts and statistics over HTTP.

mod config;
mod ingest;
mod pipeline;
mod query;
mod source;
mod web;

use config::DashboardConfig;
use pipeline::{Pipeline, PipelineSettings};
use source::HttpSource;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Load configuration before logging so LOG_LEVEL applies
    let cfg = Arc::new(DashboardConfig::load()?);

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(format!("monitorio_dashboard={}", cfg.log_level).parse()?))
        .init();

    tracing::info!("Starting monitor-io dashboard on {}:{}...", cfg.app_host, cfg.app_port);
    tracing::info!("Reading CSV exports from {}", cfg.monitor_io_url);

    let source = HttpSource::new(cfg.monitor_io_url.clone(), cfg.request_timeout)?;
    let pipeline = Arc::new(Pipeline::new(Arc::new(source), PipelineSettings::from(cfg.as_ref())));

    // Initial load runs in the background so the page is reachable immediately
    let initial = pipeline.clone();
    tokio::spawn(async move {
        if let Err(e) = initial.refresh().await {
            tracing::warn!("Initial refresh did not complete: {}", e);
        }
    });

    if let Some(interval) = cfg.refresh_interval {
        pipeline.start_auto_refresh(interval);
    }

    // Start web server
    let server = Server::new(cfg, pipeline);
    server.start().await?;

    Ok(())
}
