//! Shared configuration and primitive types for the WITS gateway.
//!
//! This crate provides fundamental types used throughout the proxy:
//! - `Config`: process-wide environment-driven configuration
//! - `Delimiter`: record-boundary convention (LF or CRLF/noralis)
//! - `UpstreamKey`: the `host:port` identity a TCPSession is keyed by

pub mod config;
pub mod delimiter;
pub mod error;
pub mod upstream_key;

pub use config::Config;
pub use delimiter::Delimiter;
pub use error::{ConfigError, Result};
pub use upstream_key::UpstreamKey;
