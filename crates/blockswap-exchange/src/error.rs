//! Exchange error types.

use thiserror::Error;

use blockswap_net::NetworkError;

/// Errors surfaced by the block exchange.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// The key is not present locally.
    #[error("Block not found")]
    NotFound,

    /// Empty or malformed key.
    #[error("Invalid key")]
    InvalidKey,

    /// The request context was cancelled.
    #[error("Request cancelled")]
    Cancelled,

    /// The request deadline elapsed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Transport-level failure.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Operation attempted after `close()`.
    #[error("Exchange already closed")]
    AlreadyClosed,
}

/// Result type for exchange operations.
pub type ExchangeResult<T> = Result<T, ExchangeError>;
