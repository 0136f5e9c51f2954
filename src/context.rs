//! Request contexts: deadline and cancellation, plus an id for logs.
//!
//! A [`Context`] bounds the requests issued under it. Each request gets its
//! own correlation id on the wire, so a context and the contexts derived
//! from it can be reused after an earlier request expired. Deriving a context with
//! [`Context::with_timeout`] can only tighten the deadline, and cancelling a
//! parent cancels every context derived from it, never the other way round.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use elko_client::Context;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ctx = Context::new(7).with_timeout(Duration::from_secs(2));
//! let tighter = ctx.with_timeout(Duration::from_millis(10));
//!
//! assert_eq!(tighter.id(), 7);
//! assert!(tighter.deadline() < ctx.deadline());
//! # }
//! ```

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ElkoError;

/// Cancellation and deadline scope for one request.
#[derive(Debug, Clone)]
pub struct Context {
    id: u64,
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl Context {
    /// Create a context with no deadline.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            deadline: None,
            token: CancellationToken::new(),
        }
    }

    /// Context driven by an existing cancellation token.
    pub(crate) fn with_token(id: u64, token: CancellationToken) -> Self {
        Self {
            id,
            deadline: None,
            token,
        }
    }

    /// Label for logs. Derived contexts keep their parent's label; it is
    /// never used as a correlation id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Derive a context whose deadline is `min(current, now + timeout)`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context whose deadline is `min(current, deadline)`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };
        Self {
            id: self.id,
            deadline: Some(deadline),
            token: self.token.child_token(),
        }
    }

    /// Cancel this context and everything derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Time left before the deadline; `None` without a deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Why this context is no longer usable, if it is not.
    pub fn err(&self) -> Option<ElkoError> {
        if self.token.is_cancelled() {
            return Some(ElkoError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ElkoError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve when the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ElkoError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => ElkoError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ElkoError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ElkoError::Cancelled
            }
        }
    }
}
