//! Per-call cancellation context.
//!
//! Every store operation takes a [`RequestContext`]. The context combines a
//! cancellation token the caller can trip at any time with an optional
//! deadline. Either one ends the operation with [`StoreError::Canceled`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A context that is never canceled unless [`cancel`](Self::cancel) is called.
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. one owned by a server request.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Same token, with a deadline `timeout` from now.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Child context: canceled when this one is, cancelable on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast if the context is already done.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.is_canceled() {
            Err(StoreError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Drive `fut` to completion unless the context ends first.
    ///
    /// The future is dropped on cancellation. Backend futures must therefore
    /// be safe to abandon at any await point.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StoreError::Canceled),
            _ = deadline => Err(StoreError::Canceled),
            result = fut => result,
        }
    }
}
