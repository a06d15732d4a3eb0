use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::authority::AuthorityError;

/// Cloneable cancellation handle shared by every suspension point of an issuance run.
#[derive(Clone, Debug)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

/// Why a guarded remote call did not produce a result.
#[derive(Debug)]
pub enum CallError {
    Cancelled,
    Authority(AuthorityError),
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives in `self`, so `wait_for` only errors if it was dropped.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` on cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Runs `fut` unless the token fires first. `None` means cancelled.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        if self.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancelled() => None,
            output = fut => Some(output),
        }
    }

    /// Runs one remote call bounded by `limit` and interruptible by cancellation.
    pub async fn call<T, F>(&self, limit: Duration, fut: F) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, AuthorityError>>,
    {
        if self.is_cancelled() {
            return Err(CallError::Cancelled);
        }
        tokio::select! {
            _ = self.cancelled() => Err(CallError::Cancelled),
            outcome = tokio::time::timeout(limit, fut) => match outcome {
                Ok(result) => result.map_err(CallError::Authority),
                Err(_) => Err(CallError::Authority(AuthorityError::TimedOut(limit))),
            },
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
