//! Exhausting the reconnect budget reports the exact attempt/delay
//! progression before a terminal `Fatal` event, and leaves the session
//! `Closed` rather than retrying forever.

use std::sync::Arc;
use std::time::Duration;

use wits_core::{Config, Delimiter, UpstreamKey};
use wits_upstream::{SessionState, TcpSession, UpstreamEvent};

#[tokio::test]
async fn reports_each_attempt_then_a_terminal_fatal_event() {
    // Nothing listens on this port: every connect attempt fails outright.
    let key = UpstreamKey::new("127.0.0.1", 1);
    let cfg = Arc::new(Config {
        max_reconnect_attempts: 2,
        socket_timeout: Duration::from_millis(200),
        ..Config::default()
    });
    let session = TcpSession::spawn(key, Delimiter::Lf, cfg, false);
    let mut events = session.subscribe();

    let mut reconnecting = Vec::new();
    let mut saw_fatal = false;
    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Ok(UpstreamEvent::Reconnecting {
                attempt,
                max_attempts,
                delay_ms,
            })) => {
                reconnecting.push((attempt, max_attempts, delay_ms));
            }
            Ok(Ok(UpstreamEvent::Fatal(_))) => {
                saw_fatal = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => break,
        }
    }

    assert_eq!(
        reconnecting.len(),
        2,
        "expected exactly two reconnecting events before exhaustion, got {reconnecting:?}"
    );

    // delay formula: min(1000 * 1.5^min(attempt,10), 60_000) * jitter[0.85, 1.15]
    assert_eq!(reconnecting[0].0, 1);
    assert_eq!(reconnecting[0].1, 2);
    assert!(
        (1270..=1730).contains(&reconnecting[0].2),
        "attempt 1 delay {}ms out of bounds",
        reconnecting[0].2
    );

    assert_eq!(reconnecting[1].0, 2);
    assert_eq!(reconnecting[1].1, 2);
    assert!(
        (1900..=2600).contains(&reconnecting[1].2),
        "attempt 2 delay {}ms out of bounds",
        reconnecting[1].2
    );

    assert!(saw_fatal, "expected a terminal Fatal event after reconnects exhausted");
    assert_eq!(session.state(), SessionState::Closed);
}
