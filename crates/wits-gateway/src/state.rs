//! Shared application state for axum handlers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use wits_core::Config;
use wits_upstream::MultiplexRegistry;

struct Inner {
    registry: Arc<MultiplexRegistry>,
    cfg: Arc<Config>,
    active_connections: AtomicUsize,
    start_time: Instant,
    shutdown: CancellationToken,
}

/// Cheaply cloneable handle shared across every axum handler and
/// ClientSession task.
#[derive(Clone)]
pub struct GatewayState(Arc<Inner>);

impl GatewayState {
    pub fn new(cfg: Arc<Config>) -> Self {
        let registry = Arc::new(MultiplexRegistry::new(cfg.clone()));
        Self(Arc::new(Inner {
            registry,
            cfg,
            active_connections: AtomicUsize::new(0),
            start_time: Instant::now(),
            shutdown: CancellationToken::new(),
        }))
    }

    pub fn registry(&self) -> &Arc<MultiplexRegistry> {
        &self.0.registry
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.0.cfg
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.0.shutdown.clone()
    }

    /// Begin orderly shutdown: cancel every ClientSession's token and
    /// tear down every TCPSession in the registry.
    pub fn initiate_shutdown(&self) {
        self.0.shutdown.cancel();
        self.0.registry.shutdown_all();
    }

    pub fn inc_connections(&self) -> usize {
        self.0.active_connections.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn dec_connections(&self) {
        self.0.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    /// Read without touching the registry or any per-session state, per
    /// the StatusEndpoint's lock-free-snapshot contract.
    pub fn active_connections(&self) -> usize {
        self.0.active_connections.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.0.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_counter_is_lock_free_and_accurate() {
        let state = GatewayState::new(Arc::new(Config::default()));
        assert_eq!(state.inc_connections(), 1);
        assert_eq!(state.inc_connections(), 2);
        state.dec_connections();
        assert_eq!(state.active_connections(), 1);
    }
}
