//! Process-wide configuration, loaded once from the environment.

use std::env;
use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Immutable process-wide configuration. Loaded once at startup via
/// [`Config::from_env`]; every field has a sane default so every
/// environment variable is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ws_port: u16,
    pub default_host: String,
    pub default_port: u16,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
    pub max_missed_pongs: u32,
    pub tls_enabled: bool,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub enable_multiplexing: bool,
    pub max_reconnect_attempts: u32,
    pub buffer_size: usize,
    pub tcp_keepalive_interval: Duration,
    pub socket_timeout: Duration,
    /// Ambient: per-client outbound bounded-queue capacity. Not named in
    /// the upstream env var list; this repo picks a default.
    pub client_queue_size: usize,
}

fn default_ws_port() -> u16 {
    8765
}

fn default_default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_default_port() -> u16 {
    5000
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_pong_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_missed_pongs() -> u32 {
    3
}

fn default_tls_enabled() -> bool {
    false
}

fn default_enable_multiplexing() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_buffer_size() -> usize {
    10_000
}

fn default_tcp_keepalive_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_socket_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_client_queue_size() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_port: default_ws_port(),
            default_host: default_default_host(),
            default_port: default_default_port(),
            heartbeat_interval: default_heartbeat_interval(),
            pong_timeout: default_pong_timeout(),
            max_missed_pongs: default_max_missed_pongs(),
            tls_enabled: default_tls_enabled(),
            cert_path: None,
            key_path: None,
            enable_multiplexing: default_enable_multiplexing(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            buffer_size: default_buffer_size(),
            tcp_keepalive_interval: default_tcp_keepalive_interval(),
            socket_timeout: default_socket_timeout(),
            client_queue_size: default_client_queue_size(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset. All variables are optional.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();

        if let Some(v) = parse_env("WITS_PROXY_PORT")? {
            cfg.ws_port = v;
        }
        if let Ok(v) = env::var("WITS_DEFAULT_HOST") {
            cfg.default_host = v;
        }
        if let Some(v) = parse_env("WITS_DEFAULT_PORT")? {
            cfg.default_port = v;
        }
        if let Some(v) = parse_millis_env("WITS_HEARTBEAT_INTERVAL")? {
            cfg.heartbeat_interval = v;
        }
        if let Some(v) = parse_millis_env("WITS_PONG_TIMEOUT")? {
            cfg.pong_timeout = v;
        }
        if let Some(v) = parse_env("WITS_MAX_MISSED_PONGS")? {
            cfg.max_missed_pongs = v;
        }
        if let Some(v) = parse_bool_env("USE_TLS")? {
            cfg.tls_enabled = v;
        }
        if let Ok(v) = env::var("CERT_PATH") {
            cfg.cert_path = Some(v);
        }
        if let Ok(v) = env::var("KEY_PATH") {
            cfg.key_path = Some(v);
        }
        if let Some(v) = parse_bool_env("ENABLE_MULTIPLEXING")? {
            cfg.enable_multiplexing = v;
        }
        if let Some(v) = parse_env("WITS_MAX_RECONNECT_ATTEMPTS")? {
            cfg.max_reconnect_attempts = v;
        }
        if let Some(v) = parse_env("WITS_BUFFER_SIZE")? {
            cfg.buffer_size = v;
        }
        if let Some(v) = parse_millis_env("WITS_TCP_KEEPALIVE_INTERVAL")? {
            cfg.tcp_keepalive_interval = v;
        }
        if let Some(v) = parse_millis_env("WITS_SOCKET_TIMEOUT")? {
            cfg.socket_timeout = v;
        }
        if let Some(v) = parse_env("WITS_CLIENT_QUEUE_SIZE")? {
            cfg.client_queue_size = v;
        }

        Ok(cfg)
    }

    /// Whether TLS should be attempted: requested and both files configured.
    /// Readability of the files is checked by the caller (Supervisor), which
    /// falls back to plaintext with a warning when they can't be read.
    pub fn tls_requested(&self) -> bool {
        self.tls_enabled && self.cert_path.is_some() && self.key_path.is_some()
    }
}

fn parse_env<T>(var: &'static str) -> Result<Option<T>>
where
    T: std::str::FromStr,
{
    match env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
        Err(_) => Ok(None),
    }
}

fn parse_millis_env(var: &'static str) -> Result<Option<Duration>> {
    match parse_env::<u64>(var)? {
        Some(ms) => Ok(Some(Duration::from_millis(ms))),
        None => Ok(None),
    }
}

fn parse_bool_env(var: &'static str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(raw) => match raw.as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue { var, value: raw }),
        },
        Err(_) => Ok(None),
    }
}
