//! Error types for the chat core.

use huddle_database::DatabaseError;
use thiserror::Error;

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("persistence error: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("chat server is not running")]
    ServerClosed,
}

/// Why a payload could not be queued on a connection's outbound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("outbound buffer is full")]
    Full,
    #[error("outbound buffer is closed")]
    Closed,
}

/// Reasons a connection's read or write loop stops.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("no keepalive response within the liveness deadline")]
    LivenessTimeout,

    #[error("write did not complete before the write deadline")]
    WriteTimeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Server(#[from] ChatError),
}
