use protocol::CodecError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("spline data error: {0}")]
    Spline(String),

    #[error("spline cache version {found} does not match supported version {expected}")]
    SplineVersion { found: i32, expected: i32 },

    #[error("outgoing queue full")]
    QueueFull,

    #[error("channel closed")]
    ChannelClosed,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    pub fn spline(reason: impl Into<String>) -> Self {
        Error::Spline(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Error::Config(reason.into())
    }
}
