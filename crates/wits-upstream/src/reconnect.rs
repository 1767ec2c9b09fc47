//! Exponential-backoff-with-jitter retry policy for [`crate::TcpSession`].

use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio_util::sync::CancellationToken;

const BASE_MS: u64 = 1000;
const MAX_CAP_MS: u64 = 60_000;

/// Outcome of a scheduled reconnect wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The delay elapsed; caller should attempt to connect.
    Fired,
    /// `cancel()` was called before the delay elapsed.
    Cancelled,
    /// `attempt` exceeded the configured maximum; do not schedule.
    Exhausted,
}

/// Computes `min(base * 1.5^min(attempt,10), max_cap) * jitter`, with
/// `jitter` drawn uniformly from `[0.85, 1.15]` on every call.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.min(10) as i32;
    let unjittered = (BASE_MS as f64) * 1.5f64.powi(exponent);
    let capped = unjittered.min(MAX_CAP_MS as f64);
    let jitter = rand::thread_rng().gen_range(0.85..=1.15);
    Duration::from_millis((capped * jitter).round() as u64)
}

/// Holds the single outstanding reconnect timer for a TCPSession.
/// `cancel()` aborts whatever `schedule()` call is currently waiting.
///
/// The token is replaced with a fresh one every time it fires or gets
/// consumed by a cancellation, since `CancellationToken` is sticky — once
/// cancelled it stays cancelled, which would otherwise make every `schedule()`
/// after the first `cancel()` return `Cancelled` instantly.
pub struct Reconnector {
    cancel: Mutex<CancellationToken>,
    max_reconnect_attempts: u32,
}

impl Reconnector {
    pub fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            cancel: Mutex::new(CancellationToken::new()),
            max_reconnect_attempts,
        }
    }

    /// Waits out the backoff delay for `attempt`, or returns immediately
    /// with `Exhausted` if `attempt` exceeds the configured maximum, or
    /// `Cancelled` if `cancel()` is invoked first.
    pub async fn schedule(&self, attempt: u32) -> (ScheduleOutcome, Duration) {
        if attempt > self.max_reconnect_attempts {
            return (ScheduleOutcome::Exhausted, Duration::ZERO);
        }
        let delay = backoff_delay(attempt);
        let token = self.cancel.lock().clone();
        let outcome = tokio::select! {
            _ = tokio::time::sleep(delay) => ScheduleOutcome::Fired,
            _ = token.cancelled() => ScheduleOutcome::Cancelled,
        };
        if outcome == ScheduleOutcome::Cancelled {
            *self.cancel.lock() = CancellationToken::new();
        }
        (outcome, delay)
    }

    /// Abort a pending `schedule()` call.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn delay_bounds_match_invariant() {
        for attempt in 0..15 {
            let exponent = attempt.min(10) as i32;
            let unjittered = (BASE_MS as f64) * 1.5f64.powi(exponent);
            let capped = unjittered.min(MAX_CAP_MS as f64);
            let lower = (capped * 0.85).round() as u64;
            let upper = (capped * 1.15).round() as u64;

            for _ in 0..20 {
                let d = backoff_delay(attempt).as_millis() as u64;
                assert!(
                    d >= lower && d <= upper,
                    "attempt {attempt}: {d} not in [{lower}, {upper}]"
                );
            }
        }
    }

    #[test]
    fn exponent_is_capped_at_ten() {
        let d10 = backoff_delay(10).as_millis() as f64;
        let d20 = backoff_delay(20).as_millis() as f64;
        // both are drawn from the same capped base (60_000ms), jitter aside
        assert!(d10 <= MAX_CAP_MS as f64 * 1.2);
        assert!(d20 <= MAX_CAP_MS as f64 * 1.2);
    }

    #[tokio::test]
    async fn exhausted_when_attempt_exceeds_max() {
        let reconnector = Reconnector::new(2);
        let (outcome, _) = reconnector.schedule(3).await;
        assert_eq!(outcome, ScheduleOutcome::Exhausted);
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_schedule() {
        let reconnector = Arc::new(Reconnector::new(10));
        let task_reconnector = reconnector.clone();
        let wait = tokio::spawn(async move {
            // attempt high enough that the uncancelled delay would be long
            task_reconnector.schedule(10).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        reconnector.cancel();
        let (outcome, _) = wait.await.unwrap();
        assert_eq!(outcome, ScheduleOutcome::Cancelled);
    }

    #[tokio::test]
    async fn schedule_recovers_after_a_cancellation() {
        // A single cancel() must not permanently short-circuit every
        // future schedule() call (the sticky-CancellationToken trap).
        let reconnector = Reconnector::new(10);
        reconnector.cancel();
        let (outcome, _) = reconnector.schedule(1).await;
        assert_eq!(outcome, ScheduleOutcome::Cancelled);

        let start = std::time::Instant::now();
        let (outcome, delay) = reconnector.schedule(0).await;
        assert_eq!(outcome, ScheduleOutcome::Fired);
        assert!(start.elapsed() >= delay / 2);
    }
}
