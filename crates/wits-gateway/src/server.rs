//! Supervisor: binds the listener, serves `/status`, and performs
//! WebSocket upgrades.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use wits_core::Config;

use crate::client_session;
use crate::error::Result;
use crate::state::GatewayState;
use crate::types::ClientParams;

#[derive(Serialize)]
struct StatusBody {
    status: &'static str,
    #[serde(rename = "activeConnections")]
    active_connections: usize,
    uptime: u64,
}

async fn status_handler(State(state): State<GatewayState>) -> Json<StatusBody> {
    Json(StatusBody {
        status: "running",
        active_connections: state.active_connections(),
        uptime: state.uptime_secs(),
    })
}

async fn ws_handler(
    State(state): State<GatewayState>,
    Query(params): Query<ClientParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| client_session::run(socket, params, state))
}

/// Build the axum router: `/status` plus a catch-all WebSocket upgrade
/// route for every other path.
pub fn create_router(state: GatewayState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .fallback(get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve. Attempts TLS if `cfg.tls_requested()` and both files
/// are readable; falls back to plaintext with a warning otherwise.
/// Returns once the server has shut down in response to the state's
/// shutdown token (or the process received SIGINT/SIGTERM).
pub async fn serve(cfg: Arc<Config>, state: GatewayState) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.ws_port));
    let app = create_router(state.clone());

    if cfg.tls_requested() && tls_files_readable(&cfg) {
        serve_tls(addr, app, cfg, state).await
    } else {
        if cfg.tls_enabled {
            warn!("TLS requested but cert/key unreadable, falling back to plaintext");
        }
        serve_plaintext(addr, app, state).await
    }
}

fn tls_files_readable(cfg: &Config) -> bool {
    let cert_ok = cfg
        .cert_path
        .as_ref()
        .is_some_and(|p| std::fs::metadata(p).is_ok());
    let key_ok = cfg
        .key_path
        .as_ref()
        .is_some_and(|p| std::fs::metadata(p).is_ok());
    cert_ok && key_ok
}

async fn serve_plaintext(addr: SocketAddr, app: Router, state: GatewayState) -> Result<()> {
    info!(%addr, "starting plaintext listener");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(state))
        .await?;
    Ok(())
}

async fn serve_tls(
    addr: SocketAddr,
    app: Router,
    cfg: Arc<Config>,
    state: GatewayState,
) -> Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let cert_path = cfg.cert_path.as_ref().expect("checked by tls_files_readable");
    let key_path = cfg.key_path.as_ref().expect("checked by tls_files_readable");

    let tls_config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| crate::error::GatewayError::Tls(e.to_string()))?;

    info!(%addr, "starting TLS listener");
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        wait_for_shutdown(state).await;
        shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
    });

    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}

async fn wait_for_shutdown(state: GatewayState) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sig.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, closing sessions");
    state.initiate_shutdown();
}
