//! Per-call context carrying cancellation and an optional deadline

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

/// Cancellation and deadline for one provider call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context from an existing cancellation token
    #[must_use]
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    /// Add a deadline `timeout` from now, keeping an earlier one if present
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let at = Instant::now() + timeout;
        self.deadline = Some(self.deadline.map_or(at, |d| d.min(at)));
        self
    }

    /// A context cancelled together with this one
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails if the call was cancelled or its deadline passed
    pub fn check(&self) -> Result<(), ProviderError> {
        if self.cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ProviderError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves with the reason once the call is cancelled or its deadline passes
    pub async fn done(&self) -> ProviderError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                () = self.cancel.cancelled() => ProviderError::Cancelled,
                () = tokio::time::sleep_until(deadline) => ProviderError::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                ProviderError::Cancelled
            }
        }
    }

    /// Run `fut`, abandoning it when the call is cancelled or times out
    pub async fn run<T, F>(&self, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        self.check()?;
        tokio::select! {
            result = fut => result,
            err = self.done() => Err(err),
        }
    }
}
