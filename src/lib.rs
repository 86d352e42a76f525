//! PlantPulse -- real-time telemetry aggregation and layered health alerting
//! for manufacturing fleets.
//!
//! This crate provides the core engine: a single owned upstream stream
//! connection demultiplexed into bounded per-equipment rolling windows, a
//! threshold evaluator merged with an externally-scored failure risk
//! overlay, and a viewer-facing API with snapshot, subscription, and
//! facility rollup operations.

pub mod api;
pub mod config;
pub mod detect;
pub mod model;
pub mod risk;
pub mod rollup;
pub mod roster;
pub mod service;
pub mod stream;
pub mod window;

use std::sync::Arc;

use anyhow::{Context, Result};

/// Start the PlantPulse daemon: aggregation engine plus viewer API.
///
/// Runs until a shutdown signal, then tears the engine down in order: the
/// API stops accepting viewers, the engine tasks are cancelled, and the
/// writer drains its last accumulated readings.
pub async fn serve(config: config::PulseConfig) -> Result<()> {
    let service = Arc::new(service::Aggregator::new(config.clone()));

    let source = stream::source::TcpEventSource::new(&config.stream.upstream_address);
    let risk_source = Arc::new(risk::HttpRiskSource::new(&config.risk.endpoint));
    let roster_source = Arc::new(roster::HttpRosterSource::new(&config.roster.endpoint));
    service.start(source, risk_source, roster_source).await;

    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid api bind address: {}", config.api.bind))?;
    let app = api::router(service.clone());

    tracing::info!(%addr, "PlantPulse listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    service.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    // Ctrl-C or SIGTERM from the service manager.
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
