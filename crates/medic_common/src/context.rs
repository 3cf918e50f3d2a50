//! Deadline and cancellation carried into every device call.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-supplied deadline plus a cancellation token.
///
/// Cloning shares the token. `child` derives a context whose deadline can only
/// be tighter than the parent's and whose token is cancelled with the parent.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// No deadline, fresh token
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    /// Use an existing token (e.g. one wired to Ctrl-C)
    pub fn with_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Derive a context bounded by `timeout` and by this context's deadline.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let own = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            deadline,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancelled, or the deadline has passed
    pub fn is_done(&self) -> bool {
        self.is_cancelled() || self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Resolves when the token is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
