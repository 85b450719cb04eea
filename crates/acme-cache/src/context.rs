//! Cancellation and deadline signal for cache operations
//!
//! Every cache operation takes a [`Context`]. The context fires either when it
//! is cancelled explicitly or when its deadline passes, and the first cause to
//! be observed is the one reported by [`Context::err`].

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

/// Caller supplied cancellation signal with an optional deadline.
///
/// Clones share the same signal. Use [`Context::child`] to derive a context
/// that can be cancelled on its own but also fires with its parent.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: Arc<OnceLock<ContextError>>,
}

impl Context {
    /// A context that never fires unless [`Context::cancel`] is called
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
            cause: Arc::new(OnceLock::new()),
        }
    }

    /// A context that fires with [`ContextError::DeadlineExceeded`] after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that fires with [`ContextError::DeadlineExceeded`] at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            ..Self::background()
        }
    }

    /// Derive a context that fires when this one does, or when cancelled itself.
    ///
    /// The child keeps the earlier of the parent's deadline and `timeout`.
    pub fn child(&self, timeout: Option<Duration>) -> Self {
        let own = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            token: self.token.child_token(),
            deadline,
            cause: Arc::new(OnceLock::new()),
        }
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        let _ = self.cause.set(ContextError::Canceled);
        self.token.cancel();
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context fired, or `None` while it is still live
    pub fn err(&self) -> Option<ContextError> {
        if let Some(cause) = self.cause.get() {
            return Some(*cause);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(*self.cause.get_or_init(|| ContextError::DeadlineExceeded));
        }
        if self.token.is_cancelled() {
            // Cancelled through a parent token
            return Some(*self.cause.get_or_init(|| ContextError::Canceled));
        }
        None
    }

    /// Wait until the context fires and return the cause
    pub async fn done(&self) -> ContextError {
        if let Some(err) = self.err() {
            return err;
        }
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {
                        let _ = self.cause.set(ContextError::DeadlineExceeded);
                    }
                }
            }
            None => self.token.cancelled().await,
        }
        self.err().unwrap_or(ContextError::Canceled)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
