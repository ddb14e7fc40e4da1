//! Network error types.

use thiserror::Error;

/// Network errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Peer not found.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Invalid message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Message too large.
    #[error("Message too large: {size} bytes, max {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Send failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload decode error.
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;
