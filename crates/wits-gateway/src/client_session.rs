//! ClientSession: owns one WebSocket, its heartbeat, and its attachment
//! to a shared TCPSession.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wits_core::{Delimiter, UpstreamKey};
use wits_upstream::UpstreamEvent;

use crate::heartbeat::{Heartbeat, HeartbeatOutcome};
use crate::state::GatewayState;
use crate::types::{self, ClientParams, InboundControl};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Drive one client's WebSocket connection end to end: parse parameters,
/// attach to (or create) the upstream TCPSession, then run until
/// disconnect, liveness failure, or a server shutdown signal.
pub async fn run(socket: WebSocket, params: ClientParams, state: GatewayState) {
    let cfg = state.config().clone();
    let host = params.host.unwrap_or_else(|| cfg.default_host.clone());
    let port = params.port.unwrap_or(cfg.default_port);
    let delimiter = Delimiter::from_noralis_flag(&params.noralis);
    let key = UpstreamKey::new(host.clone(), port);

    let session = state.registry().attach(key.clone(), delimiter);
    let mut upstream_events = session.subscribe();
    let multiplexed = cfg.enable_multiplexing;

    let (ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(cfg.client_queue_size);
    let shutdown = CancellationToken::new();
    let server_shutdown = state.shutdown_token();

    let heartbeat = Arc::new(Heartbeat::new(cfg.pong_timeout, cfg.max_missed_pongs));
    let heartbeat_task = spawn_heartbeat_ticker(
        heartbeat.clone(),
        cfg.heartbeat_interval,
        out_tx.clone(),
        shutdown.clone(),
    );

    let writer_task = tokio::spawn(async move {
        let mut ws_tx = ws_tx;
        while let Some(msg) = out_rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
        ws_tx
    });

    state.inc_connections();
    info!(%key, connections = state.active_connections(), "client session attached");

    let _ = out_tx
        .send(json_message(types::connection_connected(
            &host,
            port,
            multiplexed,
        )))
        .await;

    let mut protocol_violation = false;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = server_shutdown.cancelled() => break,

            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat.mark_alive();
                        if handle_text_frame(&text, &session, delimiter, &out_tx, &heartbeat).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        heartbeat.mark_alive();
                        let mut payload = data.to_vec();
                        payload.extend_from_slice(delimiter.as_bytes());
                        let _ = session.publish(payload);
                    }
                    Some(Ok(Message::Pong(_))) => {
                        heartbeat.mark_alive();
                    }
                    Some(Ok(Message::Ping(_))) => {
                        heartbeat.mark_alive();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(%key, "client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%key, error = %e, "client protocol violation");
                        protocol_violation = true;
                        break;
                    }
                    None => break,
                }
            }

            evt = upstream_events.recv() => {
                match evt {
                    Ok(event) => {
                        let msg = match event {
                            UpstreamEvent::Connected { .. } => continue,
                            UpstreamEvent::Disconnected => {
                                json_message(types::connection_disconnected())
                            }
                            UpstreamEvent::Reconnecting { attempt, max_attempts, delay_ms } => {
                                json_message(types::connection_reconnecting(attempt, max_attempts, delay_ms))
                            }
                            UpstreamEvent::Record(bytes) => Message::Binary(bytes.into()),
                            UpstreamEvent::Fatal(message) => {
                                json_message(types::error(&message))
                            }
                        };
                        if out_tx.try_send(msg).is_err() {
                            warn!(%key, "client outbound queue overflow, disconnecting");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%key, skipped = n, "client lagged reading upstream events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    let close_code = if protocol_violation { 1002 } else { 1000 };
    let _ = out_tx
        .send(Message::Close(Some(CloseFrame {
            code: close_code,
            reason: "normal closure".into(),
        })))
        .await;
    drop(out_tx);

    shutdown.cancel();
    heartbeat_task.abort();
    if let Ok(mut ws_tx_owned) = writer_task.await {
        let _ = ws_tx_owned.close().await;
    }

    state.registry().detach(&key, &session);
    state.dec_connections();
    info!(%key, connections = state.active_connections(), "client session detached");
}

/// Route one decoded-as-text inbound frame. Returns `true` if the
/// session should terminate.
async fn handle_text_frame(
    text: &str,
    session: &Arc<wits_upstream::TcpSession>,
    delimiter: Delimiter,
    out_tx: &mpsc::Sender<Message>,
    heartbeat: &Heartbeat,
) -> bool {
    match types::parse_inbound(text) {
        Some(InboundControl {
            kind: Some(kind),
            timestamp,
            ..
        }) if kind == "ping" => {
            let ts = timestamp.unwrap_or_else(now_ms);
            let _ = out_tx.send(json_message(types::pong(ts))).await;
            false
        }
        Some(InboundControl {
            kind: Some(kind), ..
        }) if kind == "pong" => {
            heartbeat.mark_alive();
            false
        }
        Some(InboundControl {
            command: Some(command),
            ..
        }) if command == "disconnect" => true,
        Some(InboundControl {
            command: Some(command),
            ..
        }) if command == "reconnect" => {
            session.request_reconnect();
            false
        }
        Some(InboundControl {
            command: Some(_), ..
        }) => {
            forward_raw(session, text.as_bytes(), delimiter, out_tx).await;
            false
        }
        _ => {
            // Not recognized JSON control shape, or not JSON at all:
            // forward as raw payload.
            forward_raw(session, text.as_bytes(), delimiter, out_tx).await;
            false
        }
    }
}

async fn forward_raw(
    session: &Arc<wits_upstream::TcpSession>,
    payload: &[u8],
    delimiter: Delimiter,
    out_tx: &mpsc::Sender<Message>,
) {
    let mut framed = payload.to_vec();
    framed.extend_from_slice(delimiter.as_bytes());
    if session.publish(framed).is_err() {
        let _ = out_tx
            .send(json_message(types::error("upstream not writable")))
            .await;
    }
}

fn json_message(value: serde_json::Value) -> Message {
    Message::Text(value.to_string().into())
}

fn spawn_heartbeat_ticker(
    heartbeat: Arc<Heartbeat>,
    interval: std::time::Duration,
    out_tx: mpsc::Sender<Message>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; consume it
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match heartbeat.tick() {
                        HeartbeatOutcome::Terminate => {
                            shutdown.cancel();
                            break;
                        }
                        HeartbeatOutcome::SendPing => {
                            if out_tx.send(json_message(types::ping(now_ms()))).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
    })
}
