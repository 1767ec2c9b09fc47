//! Application-level heartbeat for a ClientSession.
//!
//! Inverted from a typical client-side heartbeat manager: here the
//! *server* pings the browser client and counts consecutive misses,
//! rather than a client pinging a server.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    SendPing,
    Terminate,
}

pub struct Heartbeat {
    pong_timeout: Duration,
    max_missed_pongs: u32,
    alive: RwLock<bool>,
    missed_pongs: AtomicU32,
    last_ping_sent: RwLock<Option<Instant>>,
}

impl Heartbeat {
    pub fn new(pong_timeout: Duration, max_missed_pongs: u32) -> Self {
        Self {
            pong_timeout,
            max_missed_pongs,
            // Not marked alive until the first pong/message arrives.
            alive: RwLock::new(false),
            missed_pongs: AtomicU32::new(0),
            last_ping_sent: RwLock::new(None),
        }
    }

    /// Called on every received pong (JSON `pong` frame or a
    /// protocol-level WebSocket pong) or any inbound message.
    pub fn mark_alive(&self) {
        *self.alive.write() = true;
        self.missed_pongs.store(0, Ordering::SeqCst);

        if let Some(sent) = *self.last_ping_sent.read() {
            let elapsed = sent.elapsed();
            if elapsed > self.pong_timeout {
                debug!(elapsed_ms = elapsed.as_millis() as u64, "late pong");
            }
        }
    }

    /// Evaluate one heartbeat interval: increment the miss counter if the
    /// session wasn't marked alive since the previous tick, terminate if
    /// that reaches `max_missed_pongs`, otherwise clear the alive flag
    /// and ask the caller to send a ping.
    pub fn tick(&self) -> HeartbeatOutcome {
        let was_alive = {
            let mut alive = self.alive.write();
            let was = *alive;
            if was {
                *alive = false;
            }
            was
        };

        if !was_alive {
            let missed = self.missed_pongs.fetch_add(1, Ordering::SeqCst) + 1;
            if missed >= self.max_missed_pongs {
                return HeartbeatOutcome::Terminate;
            }
        }

        *self.last_ping_sent.write() = Some(Instant::now());
        HeartbeatOutcome::SendPing
    }

    pub fn missed_pongs(&self) -> u32 {
        self.missed_pongs.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminates_after_max_missed_pongs() {
        let hb = Heartbeat::new(Duration::from_secs(10), 3);
        assert_eq!(hb.tick(), HeartbeatOutcome::SendPing);
        assert_eq!(hb.tick(), HeartbeatOutcome::SendPing);
        assert_eq!(hb.tick(), HeartbeatOutcome::Terminate);
    }

    #[test]
    fn pong_resets_missed_counter() {
        let hb = Heartbeat::new(Duration::from_secs(10), 3);
        hb.tick();
        hb.tick();
        assert_eq!(hb.missed_pongs(), 2);
        hb.mark_alive();
        assert_eq!(hb.missed_pongs(), 0);
        // the tick right after a pong should not immediately terminate
        assert_eq!(hb.tick(), HeartbeatOutcome::SendPing);
    }
}
