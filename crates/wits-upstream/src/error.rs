use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream not writable")]
    NotWritable,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UpstreamError>;
