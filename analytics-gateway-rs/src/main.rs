// analytics-gateway-rs/src/main.rs
// Analytics gateway - session and desktop HTTP surfaces over the capability engines
// Port 5000 by default (PORT / HOST override)

use std::net::SocketAddr;
use std::sync::Arc;

use analytics_gateway::{create_router, AppState};
use anyhow::Context;
use config_rs::{GatewayConfig, LogFormat};
use error_handling::{init_logging, LoggingConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("failed to load configuration")?;

    init_logging(LoggingConfig {
        json_format: config.log_format == LogFormat::Json,
        ..LoggingConfig::default()
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    if config.api_key.is_none() {
        warn!("PBI_DESKTOP_API_KEY is empty; every desktop request will be rejected");
    }

    let addr = config.bind_address();
    info!(
        %addr,
        timeout_secs = config.capability_timeout.map(|t| t.as_secs()).unwrap_or(0),
        metrics_window = config.metrics_window,
        error_log_capacity = config.error_log_capacity,
        "Starting analytics gateway"
    );

    let state = Arc::new(AppState::new(config));
    let app = create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    info!(%addr, "Analytics gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failure")?;

    info!("Analytics gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
