use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use super::authority::CertificateAuthority;
use super::cancel::{CallError, CancelToken};
use super::error::IssuanceError;
use super::poll::{Backoff, PollError, wait_for_valid};
use super::types::{Authorization, AuthorizationStatus, ChallengeStatus};

/// Drives each authorization through verify, complete and the two status polls.
pub struct ChallengeValidator {
    authority: Arc<dyn CertificateAuthority>,
    backoff: Backoff,
    call_timeout: Duration,
}

impl ChallengeValidator {
    pub fn new(
        authority: Arc<dyn CertificateAuthority>,
        backoff: Backoff,
        call_timeout: Duration,
    ) -> Self {
        Self {
            authority,
            backoff,
            call_timeout,
        }
    }

    /// Validates authorizations one at a time, in the given order.
    ///
    /// The first failure aborts the phase. Returns the final authorization states.
    pub async fn validate(
        &self,
        authorizations: &[Authorization],
        cancel: &CancelToken,
    ) -> Result<Vec<Authorization>, IssuanceError> {
        let mut validated = Vec::with_capacity(authorizations.len());
        for authorization in authorizations {
            validated.push(self.validate_one(authorization, cancel).await?);
        }
        info!(
            "[validate] {} authorization(s) valid",
            validated.len()
        );
        Ok(validated)
    }

    async fn validate_one(
        &self,
        authorization: &Authorization,
        cancel: &CancelToken,
    ) -> Result<Authorization, IssuanceError> {
        let identifier = authorization.display_identifier();
        let challenge = authorization
            .dns_challenge()
            .ok_or_else(|| IssuanceError::ChallengeNotFound {
                identifier: identifier.clone(),
            })?;

        let already_valid = challenge.status == ChallengeStatus::Valid
            || authorization.status == AuthorizationStatus::Valid;
        if already_valid {
            debug!(
                "[validate] challenge for {} already valid; skipping verify/complete",
                identifier
            );
        } else {
            debug!("[validate] verifying dns-01 for {}", identifier);
            cancel
                .call(
                    self.call_timeout,
                    self.authority.verify_challenge(authorization, challenge),
                )
                .await
                .map_err(|err| step_failure(&identifier, "verify", err))?;

            debug!("[validate] completing dns-01 for {}", identifier);
            cancel
                .call(
                    self.call_timeout,
                    self.authority.complete_challenge(challenge),
                )
                .await
                .map_err(|err| step_failure(&identifier, "complete", err))?;
        }

        let authorization = wait_for_valid(
            &format!("authorization {identifier}"),
            &self.backoff,
            self.call_timeout,
            cancel,
            || self.authority.refresh_authorization(authorization),
        )
        .await
        .map_err(|err| poll_failure(&identifier, "poll authorization", err))?;

        let current = authorization
            .dns_challenge()
            .cloned()
            .unwrap_or_else(|| challenge.clone());
        wait_for_valid(
            &format!("challenge {identifier}"),
            &self.backoff,
            self.call_timeout,
            cancel,
            || self.authority.refresh_challenge(&current),
        )
        .await
        .map_err(|err| poll_failure(&identifier, "poll challenge", err))?;

        info!("[validate] {} is valid", identifier);
        Ok(authorization)
    }
}

fn step_failure(identifier: &str, step: &'static str, err: CallError) -> IssuanceError {
    poll_failure(identifier, step, PollError::from(err))
}

fn poll_failure(identifier: &str, step: &'static str, err: PollError) -> IssuanceError {
    match err {
        PollError::Cancelled => IssuanceError::Cancelled { stage: "validate" },
        source => IssuanceError::ChallengeVerification {
            identifier: identifier.to_string(),
            step,
            source,
        },
    }
}
