use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("bind failed: {0}")]
    BindFailed(#[from] std::io::Error),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
