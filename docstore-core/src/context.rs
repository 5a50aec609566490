//! Per-call cancellation and deadline context.
//!
//! Every [`Store`](crate::store::Store) operation takes an [`OpContext`]. When the context's
//! deadline passes or its token is cancelled, the in-flight backend future is dropped and the
//! operation returns [`DocumentStoreError::TimedOut`] or [`DocumentStoreError::Cancelled`].

use std::{future::Future, time::Duration};

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Cancellation token plus optional deadline for one or more operations.
///
/// Cloning a context shares its token: cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context that never times out and is only cancelled explicitly.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// A context driven by an existing cancellation token.
    pub fn with_token(token: CancellationToken) -> Self {
        OpContext { token, deadline: None }
    }

    /// Tightens the deadline to `timeout` from now. An earlier existing deadline is kept.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// A context cancelled together with this one, but which can also be cancelled alone.
    pub fn child(&self) -> Self {
        OpContext { token: self.token.child_token(), deadline: self.deadline }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Drives `fut` until it completes, the token is cancelled or the deadline passes.
    ///
    /// On cancellation or expiry `fut` is dropped before this returns.
    pub async fn run<F, T>(&self, fut: F) -> DocumentStoreResult<T>
    where
        F: Future<Output = DocumentStoreResult<T>>,
    {
        if self.token.is_cancelled() {
            return Err(DocumentStoreError::Cancelled);
        }

        match self.deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return Err(DocumentStoreError::TimedOut);
                }

                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(DocumentStoreError::Cancelled),
                    _ = sleep_until(deadline) => Err(DocumentStoreError::TimedOut),
                    result = fut => result,
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Err(DocumentStoreError::Cancelled),
                    result = fut => result,
                }
            }
        }
    }
}
