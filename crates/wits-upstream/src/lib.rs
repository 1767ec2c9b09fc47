//! Upstream TCP session management for the WITS gateway.
//!
//! - [`TcpSession`]: owns one upstream socket, the [`wits_framer::Framer`]
//!   over it, and the reconnect state machine.
//! - [`Reconnector`] / [`backoff_delay`]: exponential-backoff-with-jitter
//!   retry policy.
//! - [`MultiplexRegistry`]: maps `host:port` to a shared `TcpSession`.

pub mod error;
pub mod reconnect;
pub mod registry;
pub mod session;

pub use error::UpstreamError;
pub use reconnect::{backoff_delay, Reconnector, ScheduleOutcome};
pub use registry::MultiplexRegistry;
pub use session::{SessionState, TcpSession, UpstreamEvent};
