use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use reqwest::Client;
use tokio::time::Instant;

use super::DnsProviderError;
use crate::issuance::cancel::CancelToken;
use crate::issuance::dns::{DnsPropagationResult, PropagationState, check_txt_record};

/// Checks public DNS until the record is served with the expected value or `timeout` elapses.
///
/// Returns `None` when cancelled. Wrong content is reported immediately.
pub async fn poll_dns_propagation(
    client: &Client,
    resolvers: &[String],
    record_name: &str,
    expected_value: &str,
    timeout: Duration,
    interval: Duration,
    cancel: &CancelToken,
) -> Option<DnsPropagationResult> {
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(
            "[dns-retry] propagation check attempt {} for {}",
            attempt, record_name
        );

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = check_txt_record(client, resolvers, record_name, expected_value) => result,
        };

        match result.state {
            PropagationState::Found => {
                debug!(
                    "[dns-retry] record found after {}ms (attempt {})",
                    started.elapsed().as_millis(),
                    attempt
                );
                return Some(result);
            }
            PropagationState::WrongContent => {
                warn!(
                    "[dns-retry] TXT record at {} has wrong value, observed {:?}",
                    record_name, result.observed_values
                );
                return Some(result);
            }
            PropagationState::NxDomain | PropagationState::Pending | PropagationState::Error => {
                if started.elapsed() >= timeout {
                    warn!(
                        "[dns-retry] propagation timeout after {}ms (attempt {}), last state: {:?}",
                        started.elapsed().as_millis(),
                        attempt,
                        result.state
                    );
                    return Some(result);
                }
                let remaining = timeout.saturating_sub(started.elapsed());
                debug!(
                    "[dns-retry] record not found yet (state={:?}), waiting {}s ({}s remaining)",
                    result.state,
                    interval.as_secs(),
                    remaining.as_secs()
                );
                if !cancel.sleep(interval).await {
                    return None;
                }
            }
        }
    }
}

/// Retries a provider-side check until it returns `Ok(true)` or `timeout` is reached.
///
/// `Ok(false)` means "not yet"; an error aborts immediately.
pub async fn retry_provider_verification<F, Fut>(
    record: &str,
    operation: &str,
    timeout: Duration,
    interval: Duration,
    mut verify_fn: F,
) -> Result<(), DnsProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, DnsProviderError>>,
{
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(
            "[provider-retry] {} verification attempt {} for {}",
            operation, attempt, record
        );

        match verify_fn().await {
            Ok(true) => {
                debug!(
                    "[provider-retry] {} verified after {}ms (attempt {})",
                    operation,
                    started.elapsed().as_millis(),
                    attempt
                );
                return Ok(());
            }
            Ok(false) => {
                if started.elapsed() >= timeout {
                    warn!(
                        "[provider-retry] {} verification timeout after {}ms (attempt {})",
                        operation,
                        started.elapsed().as_millis(),
                        attempt
                    );
                    return Err(DnsProviderError::Verification(format!(
                        "{} verification failed for {}: timeout after {}ms",
                        operation,
                        record,
                        started.elapsed().as_millis()
                    )));
                }
                tokio::time::sleep(interval).await;
            }
            Err(err) => {
                warn!(
                    "[provider-retry] {} verification failed immediately: {}",
                    operation, err
                );
                return Err(err);
            }
        }
    }
}
