//! Client-facing surface of the WITS gateway: the WebSocket session
//! lifecycle, application-level heartbeat, and the HTTP supervisor that
//! ties it all together.

pub mod client_session;
pub mod error;
pub mod heartbeat;
pub mod server;
pub mod state;
pub mod types;

pub use error::GatewayError;
pub use server::{create_router, serve};
pub use state::GatewayState;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the rustls crypto provider. Must be called before `serve` is
/// ever asked to bind a TLS listener.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
