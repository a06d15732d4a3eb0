use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use tokio::time::Instant;

use super::authority::{AuthorityError, CertificateAuthority};
use super::cancel::{CallError, CancelToken};
use super::error::IssuanceError;
use super::types::{Order, OrderStatus, PollState, StatusResource};

/// Delay schedule for status polling: doubles from `min`, clamped to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub min: Duration,
    pub max: Duration,
    pub attempts: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration, attempts: u32) -> Self {
        Self { min, max, attempts }
    }

    /// Delay after the `retry`-th failed check (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.min
            .checked_mul(factor)
            .unwrap_or(self.max)
            .min(self.max)
            .max(self.min)
    }
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("polling cancelled")]
    Cancelled,
    #[error("{0}")]
    Invalid(String),
    #[error("{label} still {last_status} after {attempts} attempt(s)")]
    Exhausted {
        label: String,
        attempts: u32,
        last_status: String,
    },
    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

impl From<CallError> for PollError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Cancelled => PollError::Cancelled,
            CallError::Authority(source) => PollError::Authority(source),
        }
    }
}

/// Polls `fetch` until the resource reports valid.
///
/// A terminal status fails immediately; a resource still pending after
/// `backoff.attempts` checks fails with [`PollError::Exhausted`].
pub async fn wait_for_valid<T, F, Fut>(
    label: &str,
    backoff: &Backoff,
    call_timeout: Duration,
    cancel: &CancelToken,
    mut fetch: F,
) -> Result<T, PollError>
where
    T: StatusResource,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AuthorityError>>,
{
    let attempts = backoff.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let resource = cancel.call(call_timeout, fetch()).await?;

        match resource.poll_state() {
            PollState::Done => {
                debug!("[poll] {} valid after {} attempt(s)", label, attempt);
                return Ok(resource);
            }
            PollState::Failed(reason) => {
                warn!("[poll] {} reached a terminal status: {}", label, reason);
                return Err(PollError::Invalid(reason));
            }
            PollState::Pending => {
                if attempt >= attempts {
                    let last_status = resource.status_label();
                    warn!(
                        "[poll] {} still {} after {} attempt(s)",
                        label, last_status, attempt
                    );
                    return Err(PollError::Exhausted {
                        label: label.to_string(),
                        attempts: attempt,
                        last_status,
                    });
                }
                let delay = backoff.delay(attempt - 1);
                debug!(
                    "[poll] {} is {} (attempt {}/{}), waiting {}s",
                    label,
                    resource.status_label(),
                    attempt,
                    attempts,
                    delay.as_secs()
                );
                if !cancel.sleep(delay).await {
                    return Err(PollError::Cancelled);
                }
            }
        }
    }
}

/// Refreshes the order at a fixed interval until it is valid or `max_wait` elapses.
pub async fn poll_order_until_valid(
    authority: &dyn CertificateAuthority,
    order: &Order,
    interval: Duration,
    max_wait: Duration,
    call_timeout: Duration,
    cancel: &CancelToken,
) -> Result<Order, IssuanceError> {
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let current = match cancel
            .call(call_timeout, authority.refresh_order(order))
            .await
        {
            Ok(current) => current,
            Err(CallError::Cancelled) => return Err(IssuanceError::Cancelled { stage: "finalize" }),
            Err(CallError::Authority(source)) => {
                return Err(IssuanceError::Authority {
                    stage: "refresh order",
                    source,
                });
            }
        };

        match current.status {
            OrderStatus::Valid => {
                debug!(
                    "[finalize] order {} valid after {}ms (attempt {})",
                    current.id,
                    started.elapsed().as_millis(),
                    attempt
                );
                return Ok(current);
            }
            OrderStatus::Invalid => {
                let message = current
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("order {} became invalid", current.id));
                warn!("[finalize] {}", message);
                return Err(IssuanceError::CertificateRetrieval { message });
            }
            status => {
                let waited = started.elapsed();
                if waited >= max_wait {
                    warn!(
                        "[finalize] order {} still {:?} after {}s (attempt {})",
                        current.id,
                        status,
                        waited.as_secs(),
                        attempt
                    );
                    return Err(IssuanceError::OrderTimedOut {
                        waited,
                        last_status: status,
                    });
                }
                debug!(
                    "[finalize] order {} is {:?}, checking again in {}s",
                    current.id,
                    status,
                    interval.as_secs()
                );
                if !cancel.sleep(interval).await {
                    return Err(IssuanceError::Cancelled { stage: "finalize" });
                }
            }
        }
    }
}

/// Retries `operation` with a fixed delay while it fails with a transient error.
///
/// Non-transient errors surface immediately. Running out of attempts yields
/// [`IssuanceError::CertificateUnavailable`].
pub async fn retry_transient<T, F, Fut>(
    label: &str,
    delay: Duration,
    max_attempts: u32,
    cancel: &CancelToken,
    mut operation: F,
) -> Result<T, IssuanceError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, IssuanceError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(IssuanceError::Cancelled { stage: "certificate" });
        }
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                if attempt >= max_attempts {
                    warn!(
                        "[finalize] {} still unavailable after {} attempt(s)",
                        label, attempt
                    );
                    return Err(IssuanceError::CertificateUnavailable { attempts: attempt });
                }
                debug!(
                    "[finalize] {} not ready (attempt {}/{}), retrying in {}s",
                    label,
                    attempt,
                    max_attempts,
                    delay.as_secs()
                );
                if !cancel.sleep(delay).await {
                    return Err(IssuanceError::Cancelled { stage: "certificate" });
                }
            }
            Err(err) => return Err(err),
        }
    }
}
