//! TCPSession: owns one upstream socket, its Framer, and the reconnect
//! state machine. At most one socket is live and at most one reconnect
//! timer is outstanding at any time.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wits_core::{Config, Delimiter, UpstreamKey};
use wits_framer::Framer;

use crate::reconnect::{Reconnector, ScheduleOutcome};

/// Connection-state of a TCPSession.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Event emitted by a TCPSession to every subscriber.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Connected {
        host: String,
        port: u16,
        multiplexed: bool,
    },
    Disconnected,
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
    },
    Record(Vec<u8>),
    Fatal(String),
}

const READ_CHUNK: usize = 4096;
/// Bound on the write queue feeding the upstream socket. `publish` uses
/// `try_send` against this so a stalled socket fails fast instead of
/// buffering unboundedly.
const WRITE_QUEUE_CAPACITY: usize = 256;

/// Owns one upstream TCP connection. Created via [`TcpSession::spawn`],
/// which hands back a handle while the read/write loop runs as a detached
/// background task.
pub struct TcpSession {
    key: UpstreamKey,
    delimiter: Delimiter,
    cfg: Arc<Config>,
    state: RwLock<SessionState>,
    subscriber_count: AtomicUsize,
    events_tx: broadcast::Sender<UpstreamEvent>,
    write_tx: RwLock<mpsc::Sender<Vec<u8>>>,
    reconnect_attempt: AtomicU32,
    shutdown: CancellationToken,
    reconnector: Reconnector,
    multiplexed: bool,
}

impl TcpSession {
    /// Spawn a session's read/write loop and return a handle to it. The
    /// loop begins attempting its first connect immediately.
    pub fn spawn(key: UpstreamKey, delimiter: Delimiter, cfg: Arc<Config>, multiplexed: bool) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(1024);
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let shutdown = CancellationToken::new();
        let reconnector = Reconnector::new(cfg.max_reconnect_attempts);

        let session = Arc::new(Self {
            key: key.clone(),
            delimiter,
            cfg: cfg.clone(),
            state: RwLock::new(SessionState::Idle),
            subscriber_count: AtomicUsize::new(0),
            events_tx: events_tx.clone(),
            write_tx: RwLock::new(write_tx),
            reconnect_attempt: AtomicU32::new(0),
            shutdown: shutdown.clone(),
            reconnector,
            multiplexed,
        });

        session.spawn_run_task(key, delimiter, cfg, events_tx, write_rx, shutdown);

        session
    }

    fn spawn_run_task(
        self: &Arc<Self>,
        key: UpstreamKey,
        delimiter: Delimiter,
        cfg: Arc<Config>,
        events_tx: broadcast::Sender<UpstreamEvent>,
        write_rx: mpsc::Receiver<Vec<u8>>,
        shutdown: CancellationToken,
    ) {
        let task_session = self.clone();
        tokio::spawn(async move {
            task_session
                .run(key, delimiter, cfg, events_tx, write_rx, shutdown)
                .await;
        });
    }

    /// Restart the read/write loop of a `Closed` session in place, reusing
    /// its existing subscriber set and event stream. Called by
    /// `request_reconnect` once the previous loop has exhausted its
    /// reconnect attempts and exited for good.
    fn respawn(self: &Arc<Self>) {
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        *self.write_tx.write() = write_tx;
        self.reconnect_attempt.store(0, Ordering::SeqCst);

        self.spawn_run_task(
            self.key.clone(),
            self.delimiter,
            self.cfg.clone(),
            self.events_tx.clone(),
            write_rx,
            self.shutdown.clone(),
        );
    }

    pub fn key(&self) -> &UpstreamKey {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Subscribe to this session's event/record stream.
    pub fn subscribe(&self) -> broadcast::Receiver<UpstreamEvent> {
        self.events_tx.subscribe()
    }

    /// Enqueue bytes for transmission toward the upstream. Never blocks;
    /// if the write queue is full the caller receives `NotWritable`
    /// immediately rather than stalling.
    pub fn publish(&self, bytes: Vec<u8>) -> Result<(), crate::error::UpstreamError> {
        self.write_tx
            .read()
            .try_send(bytes)
            .map_err(|_| crate::error::UpstreamError::NotWritable)
    }

    /// Ask the session to reconnect. If a read/write loop is currently
    /// running (connected, connecting, or backing off), this cancels its
    /// pending backoff wait so it retries immediately. If the loop has
    /// already exited after exhausting its reconnect attempts (`Closed`),
    /// this restarts it from scratch instead — otherwise a dead session
    /// would never come back to life.
    pub fn request_reconnect(self: &Arc<Self>) {
        let was_closed = {
            let mut state = self.state.write();
            if *state == SessionState::Closed {
                *state = SessionState::Idle;
                true
            } else {
                false
            }
        };

        if was_closed {
            if !self.shutdown.is_cancelled() {
                self.respawn();
            }
        } else {
            self.reconnector.cancel();
        }
    }

    pub fn inc_subscriber(&self) -> usize {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the subscriber count after decrementing.
    pub fn dec_subscriber(&self) -> usize {
        self.subscriber_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .map(|prev| prev.saturating_sub(1))
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    /// Orderly shutdown: stop the read/write loop and cancel any pending
    /// reconnect timer.
    pub fn shutdown(&self) {
        *self.state.write() = SessionState::Closed;
        self.shutdown.cancel();
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        self: Arc<Self>,
        key: UpstreamKey,
        delimiter: Delimiter,
        cfg: Arc<Config>,
        events_tx: broadcast::Sender<UpstreamEvent>,
        mut write_rx: mpsc::Receiver<Vec<u8>>,
        shutdown: CancellationToken,
    ) {
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            *self.state.write() = SessionState::Connecting;
            match self.try_connect(&key, &cfg).await {
                Ok(mut stream) => {
                    attempt = 0;
                    self.reconnect_attempt.store(0, Ordering::SeqCst);
                    *self.state.write() = SessionState::Connected;
                    info!(upstream = %key, "upstream connected");
                    let _ = events_tx.send(UpstreamEvent::Connected {
                        host: key.host.clone(),
                        port: key.port,
                        multiplexed: self.multiplexed,
                    });

                    if delimiter == Delimiter::CrLf {
                        if let Err(e) = stream.write_all(delimiter.as_bytes()).await {
                            warn!(upstream = %key, error = %e, "noralis handshake write failed");
                        }
                    }

                    let outcome = self
                        .session_loop(&mut stream, delimiter, &cfg, &events_tx, &mut write_rx, &shutdown)
                        .await;

                    if shutdown.is_cancelled() {
                        break;
                    }
                    match outcome {
                        LoopExit::Reconnect => {
                            let _ = events_tx.send(UpstreamEvent::Disconnected);
                        }
                        LoopExit::Shutdown => break,
                    }
                }
                Err(e) => {
                    debug!(upstream = %key, error = %e, "connect failed");
                }
            }

            attempt += 1;
            self.reconnect_attempt.store(attempt, Ordering::SeqCst);
            *self.state.write() = SessionState::Reconnecting;

            let (outcome, delay) = self.reconnector.schedule(attempt).await;
            match outcome {
                ScheduleOutcome::Exhausted => {
                    *self.state.write() = SessionState::Closed;
                    let _ = events_tx.send(UpstreamEvent::Fatal(
                        "reconnect attempts exhausted".to_string(),
                    ));
                    break;
                }
                ScheduleOutcome::Cancelled => {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    // request_reconnect() fired: retry immediately.
                }
                ScheduleOutcome::Fired => {
                    let _ = events_tx.send(UpstreamEvent::Reconnecting {
                        attempt,
                        max_attempts: cfg.max_reconnect_attempts,
                        delay_ms: delay.as_millis() as u64,
                    });
                }
            }
        }
    }

    async fn try_connect(&self, key: &UpstreamKey, cfg: &Config) -> std::io::Result<TcpStream> {
        let addr = format!("{}:{}", key.host, key.port);
        let connect = TcpStream::connect(&addr);
        let stream = tokio::time::timeout(cfg.socket_timeout, connect)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;

        stream.set_nodelay(true)?;
        let sock_ref = SockRef::from(&stream);
        let keepalive = TcpKeepalive::new().with_time(cfg.tcp_keepalive_interval);
        sock_ref.set_tcp_keepalive(&keepalive)?;

        Ok(stream)
    }

    async fn session_loop(
        &self,
        stream: &mut TcpStream,
        delimiter: Delimiter,
        cfg: &Config,
        events_tx: &broadcast::Sender<UpstreamEvent>,
        write_rx: &mut mpsc::Receiver<Vec<u8>>,
        shutdown: &CancellationToken,
    ) -> LoopExit {
        let mut framer = Framer::new(delimiter, cfg.buffer_size);
        let mut buf = vec![0u8; READ_CHUNK];
        let mut last_activity = Instant::now();

        loop {
            let idle_budget = cfg.socket_timeout.saturating_sub(last_activity.elapsed());
            if idle_budget.is_zero() {
                warn!(upstream = %self.key, "upstream socket idle timeout");
                return LoopExit::Reconnect;
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    return LoopExit::Shutdown;
                }

                outgoing = write_rx.recv() => {
                    match outgoing {
                        Some(bytes) => {
                            if let Err(e) = stream.write_all(&bytes).await {
                                warn!(upstream = %self.key, error = %e, "upstream write failed");
                                return LoopExit::Reconnect;
                            }
                        }
                        None => {
                            // publish handle fully dropped; keep reading, nothing to write anymore
                        }
                    }
                }

                read_result = tokio::time::timeout(idle_budget, stream.read(&mut buf)) => {
                    match read_result {
                        Ok(Ok(0)) => {
                            debug!(upstream = %self.key, "upstream closed connection (FIN)");
                            return LoopExit::Reconnect;
                        }
                        Ok(Ok(n)) => {
                            last_activity = Instant::now();
                            for record in framer.feed(&buf[..n]) {
                                let _ = events_tx.send(UpstreamEvent::Record(record));
                            }
                        }
                        Ok(Err(e)) => {
                            warn!(upstream = %self.key, error = %e, "upstream read error");
                            return LoopExit::Reconnect;
                        }
                        Err(_) => {
                            warn!(upstream = %self.key, "upstream socket idle timeout");
                            return LoopExit::Reconnect;
                        }
                    }
                }
            }
        }
    }
}

enum LoopExit {
    Reconnect,
    Shutdown,
}
