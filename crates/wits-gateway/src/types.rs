//! Control-frame vocabulary exchanged over the client WebSocket.
//!
//! Outbound frames are built ad hoc with `serde_json::json!`, mirroring
//! the dynamic-object style used for upstream subscription payloads
//! elsewhere in this codebase. Inbound frames are decoded into a loose
//! envelope first; routing on `type`/`command` happens in
//! [`crate::client_session`].

use serde::Deserialize;
use serde_json::{json, Value};

/// Query parameters accepted on the WebSocket upgrade.
#[derive(Debug, Deserialize)]
pub struct ClientParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub noralis: String,
    #[serde(default)]
    pub version: String,
}

/// Loosely-typed view of a decoded inbound JSON control object.
#[derive(Debug, Default)]
pub struct InboundControl {
    pub kind: Option<String>,
    pub command: Option<String>,
    pub timestamp: Option<i64>,
}

/// Attempt to decode `text` as a JSON control object. Returns `None` if
/// it isn't valid JSON or isn't a JSON object — callers fall back to
/// treating the frame as raw payload.
pub fn parse_inbound(text: &str) -> Option<InboundControl> {
    let value: Value = serde_json::from_str(text).ok()?;
    let obj = value.as_object()?;
    Some(InboundControl {
        kind: obj.get("type").and_then(Value::as_str).map(str::to_string),
        command: obj
            .get("command")
            .and_then(Value::as_str)
            .map(str::to_string),
        timestamp: obj.get("timestamp").and_then(Value::as_i64),
    })
}

pub fn connection_connected(host: &str, port: u16, multiplexed: bool) -> Value {
    json!({
        "type": "connection",
        "status": "connected",
        "host": host,
        "port": port,
        "multiplexed": multiplexed,
    })
}

pub fn connection_disconnected() -> Value {
    json!({"type": "connection", "status": "disconnected"})
}

pub fn connection_reconnecting(attempt: u32, max_attempts: u32, delay_ms: u64) -> Value {
    json!({
        "type": "connection",
        "status": "reconnecting",
        "attempt": attempt,
        "maxAttempts": max_attempts,
        "delay": delay_ms,
    })
}

pub fn ping(timestamp: i64) -> Value {
    json!({"type": "ping", "timestamp": timestamp})
}

pub fn pong(timestamp: i64) -> Value {
    json!({"type": "pong", "timestamp": timestamp})
}

pub fn error(message: &str) -> Value {
    json!({"type": "error", "message": message})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping_control_frame() {
        let parsed = parse_inbound(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(parsed.kind.as_deref(), Some("ping"));
        assert!(parsed.command.is_none());
    }

    #[test]
    fn parses_command_field() {
        let parsed = parse_inbound(r#"{"command":"disconnect"}"#).unwrap();
        assert_eq!(parsed.command.as_deref(), Some("disconnect"));
    }

    #[test]
    fn non_json_returns_none() {
        assert!(parse_inbound("not json").is_none());
    }

    #[test]
    fn non_object_json_returns_none() {
        assert!(parse_inbound("[1,2,3]").is_none());
    }
}
