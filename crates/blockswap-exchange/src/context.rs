//! Request-scoped cancellation and deadlines.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::ExchangeError;

/// Cancellation scope for a single request.
///
/// Carries a cancellation token and an optional deadline. Cloning shares the
/// scope: cancelling any clone cancels them all. Dropping a context does not
/// cancel it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that only fires when explicitly cancelled.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that fires `DeadlineExceeded` after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Cancel the context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once cancelled or past the deadline.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// The error this context resolves to, preferring `Cancelled`.
    pub fn error(&self) -> ExchangeError {
        if self.token.is_cancelled() {
            ExchangeError::Cancelled
        } else {
            ExchangeError::DeadlineExceeded
        }
    }

    /// Resolves when the context fires, with the error to propagate.
    pub async fn done(&self) -> ExchangeError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => ExchangeError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ExchangeError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ExchangeError::Cancelled
            }
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::background()
    }
}
