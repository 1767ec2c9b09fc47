//! MultiplexRegistry: maps an upstream key to a shared [`TcpSession`].

use std::sync::Arc;

use dashmap::DashMap;
use wits_core::{Config, Delimiter, UpstreamKey};

use crate::session::{SessionState, TcpSession};

/// Maps `host:port` to a shared `TcpSession`. Every session present in
/// the map has a non-empty subscriber set; lookup/insert/delete are
/// atomic with respect to concurrent attach/detach via `DashMap`'s
/// sharded locking.
pub struct MultiplexRegistry {
    sessions: DashMap<UpstreamKey, Arc<TcpSession>>,
    cfg: Arc<Config>,
}

impl MultiplexRegistry {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            sessions: DashMap::new(),
            cfg,
        }
    }

    /// If an entry for `key` exists and its socket is writable, add a
    /// subscriber and return it. If the entry exists but its session has
    /// gone `Closed` (reconnect attempts exhausted), restart it in place
    /// rather than leaving new subscribers attached to a dead session.
    /// Otherwise create a new `TcpSession`, insert it, and return it with
    /// its first subscriber already attached. When multiplexing is
    /// disabled, always creates a fresh, unshared session.
    pub fn attach(&self, key: UpstreamKey, delimiter: Delimiter) -> Arc<TcpSession> {
        if !self.cfg.enable_multiplexing {
            let session = TcpSession::spawn(key, delimiter, self.cfg.clone(), false);
            session.inc_subscriber();
            return session;
        }

        let session = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| TcpSession::spawn(key, delimiter, self.cfg.clone(), true))
            .clone();

        if session.state() == SessionState::Closed {
            session.request_reconnect();
        }

        session.inc_subscriber();
        session
    }

    /// Remove `client`'s subscription. If the subscriber set becomes
    /// empty, the session is shut down and (when multiplexing is
    /// enabled) removed from the map.
    pub fn detach(&self, key: &UpstreamKey, session: &Arc<TcpSession>) {
        let remaining = session.dec_subscriber();
        if remaining == 0 {
            if self.cfg.enable_multiplexing {
                self.sessions.remove(key);
            }
            session.shutdown();
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Shut down every tracked session and clear the map. Used by the
    /// Supervisor during orderly shutdown.
    pub fn shutdown_all(&self) {
        for entry in self.sessions.iter() {
            entry.value().shutdown();
        }
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn fake_upstream_key() -> UpstreamKey {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });
        UpstreamKey::new(addr.ip().to_string(), addr.port())
    }

    #[tokio::test]
    async fn multiplexed_attach_shares_one_session() {
        let key = fake_upstream_key().await;
        let cfg = Arc::new(Config::default());
        let registry = MultiplexRegistry::new(cfg);

        let a = registry.attach(key.clone(), Delimiter::Lf);
        let b = registry.attach(key.clone(), Delimiter::Lf);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.active_count(), 1);
        assert_eq!(a.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn detaching_last_subscriber_removes_session() {
        let key = fake_upstream_key().await;
        let cfg = Arc::new(Config::default());
        let registry = MultiplexRegistry::new(cfg);

        let a = registry.attach(key.clone(), Delimiter::Lf);
        registry.detach(&key, &a);

        assert_eq!(registry.active_count(), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn non_multiplexed_attach_never_shares() {
        let key = fake_upstream_key().await;
        let cfg = Arc::new(Config {
            enable_multiplexing: false,
            ..Config::default()
        });
        let registry = MultiplexRegistry::new(cfg);

        let a = registry.attach(key.clone(), Delimiter::Lf);
        let b = registry.attach(key.clone(), Delimiter::Lf);

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.active_count(), 0);
    }
}
