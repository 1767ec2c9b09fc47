//! WITS Gateway - Entry Point
//!
//! Bridges browser WebSocket clients to WITS telemetry TCP streams,
//! multiplexing subscribers onto a shared upstream connection per
//! host/port and re-framing the raw byte stream into discrete records.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use wits_core::Config;
use wits_gateway::GatewayState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any TLS listener binds).
    wits_gateway::init_crypto();

    wits_telemetry::init_logging()?;

    info!("starting wits-server v{}", env!("CARGO_PKG_VERSION"));

    let cfg = Arc::new(Config::from_env()?);
    info!(
        ws_port = cfg.ws_port,
        default_host = %cfg.default_host,
        default_port = cfg.default_port,
        enable_multiplexing = cfg.enable_multiplexing,
        tls_enabled = cfg.tls_enabled,
        "configuration loaded"
    );

    let state = GatewayState::new(cfg.clone());

    wits_gateway::serve(cfg, state).await?;

    info!("wits-server shut down cleanly");
    Ok(())
}
