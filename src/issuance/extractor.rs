use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinSet;

use super::authority::{AuthorityError, CertificateAuthority};
use super::cancel::CancelToken;
use super::error::IssuanceError;
use super::types::{Authorization, AuthorizationStatus, Challenge, Order, PublishedChallenge};
use crate::domain::{Domain, record_name};

/// An order together with the TXT values its authorizations need.
///
/// `authorizations` and `challenges` are index-aligned.
#[derive(Debug, Clone)]
pub struct ExtractedChallenges {
    pub order: Order,
    pub authorizations: Vec<Authorization>,
    pub challenges: Vec<PublishedChallenge>,
}

pub struct ChallengeExtractor {
    authority: Arc<dyn CertificateAuthority>,
    call_timeout: Duration,
}

impl ChallengeExtractor {
    pub fn new(authority: Arc<dyn CertificateAuthority>, call_timeout: Duration) -> Self {
        Self {
            authority,
            call_timeout,
        }
    }

    /// Creates the order and collects the DNS-01 values to publish.
    pub async fn extract(
        &self,
        domain: &Domain,
        cancel: &CancelToken,
    ) -> Result<ExtractedChallenges, IssuanceError> {
        let order = self.order_for(domain, cancel).await?;
        self.challenges_for(domain, order, cancel).await
    }

    /// Orders `domain` and `*.domain` together.
    pub async fn order_for(
        &self,
        domain: &Domain,
        cancel: &CancelToken,
    ) -> Result<Order, IssuanceError> {
        let identifiers = domain.identifiers();
        let order = cancel
            .call(self.call_timeout, self.authority.create_order(&identifiers))
            .await
            .map_err(|err| match IssuanceError::from_call("order", err) {
                IssuanceError::Authority { source, .. } => IssuanceError::OrderCreation { source },
                other => other,
            })?;
        info!(
            "[extract] order {} created for {:?} ({:?})",
            order.id, identifiers, order.status
        );
        Ok(order)
    }

    /// Fetches authorizations, retires stale valid ones and computes TXT values.
    ///
    /// Valid authorizations are deactivated and the order is recreated once. If
    /// the CA still hands back valid authorizations they are kept; validation
    /// skips them.
    pub async fn challenges_for(
        &self,
        domain: &Domain,
        order: Order,
        cancel: &CancelToken,
    ) -> Result<ExtractedChallenges, IssuanceError> {
        let mut order = order;
        let mut authorizations = self.fetch_authorizations(&order, cancel).await?;

        let stale: Vec<&Authorization> = authorizations
            .iter()
            .filter(|authz| authz.status == AuthorizationStatus::Valid)
            .collect();
        if !stale.is_empty() {
            for authz in &stale {
                info!(
                    "[extract] deactivating previously valid authorization for {}",
                    authz.display_identifier()
                );
                cancel
                    .call(
                        self.call_timeout,
                        self.authority.deactivate_authorization(authz),
                    )
                    .await
                    .map_err(|err| IssuanceError::from_call("deactivate authorization", err))?;
            }
            order = self.order_for(domain, cancel).await?;
            authorizations = self.fetch_authorizations(&order, cancel).await?;
            let still_valid = authorizations
                .iter()
                .filter(|authz| authz.status == AuthorizationStatus::Valid)
                .count();
            if still_valid > 0 {
                warn!(
                    "[extract] {} authorization(s) for {} still valid after deactivation",
                    still_valid, domain
                );
            }
        }

        let challenges = select_dns_challenges(&authorizations)?;
        let contents = self.key_authorizations(&challenges, cancel).await?;
        let published = authorizations
            .iter()
            .zip(contents)
            .map(|(authz, content)| PublishedChallenge {
                identifier: authz.display_identifier(),
                record_name: record_name(&authz.identifier),
                content,
            })
            .collect::<Vec<_>>();
        debug!(
            "[extract] {} challenge value(s) ready for {}",
            published.len(),
            domain
        );

        Ok(ExtractedChallenges {
            order,
            authorizations,
            challenges: published,
        })
    }

    async fn fetch_authorizations(
        &self,
        order: &Order,
        cancel: &CancelToken,
    ) -> Result<Vec<Authorization>, IssuanceError> {
        let authorizations = cancel
            .call(self.call_timeout, self.authority.authorizations(order))
            .await
            .map_err(|err| IssuanceError::from_call("fetch authorizations", err))?;
        debug!(
            "[extract] order {} has {} authorization(s)",
            order.id,
            authorizations.len()
        );
        Ok(authorizations)
    }

    /// Computes every key authorization concurrently, returning them in input order.
    async fn key_authorizations(
        &self,
        challenges: &[Challenge],
        cancel: &CancelToken,
    ) -> Result<Vec<String>, IssuanceError> {
        let mut tasks = JoinSet::new();
        for (index, challenge) in challenges.iter().cloned().enumerate() {
            let authority = Arc::clone(&self.authority);
            let cancel = cancel.clone();
            let limit = self.call_timeout;
            tasks.spawn(async move {
                let result = cancel
                    .call(limit, async { authority.key_authorization(&challenge).await })
                    .await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<String>> = vec![None; challenges.len()];
        let mut first_error: Option<(usize, IssuanceError)> = None;
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(err) => {
                    return Err(IssuanceError::Authority {
                        stage: "key authorization",
                        source: AuthorityError::Protocol(err.to_string()),
                    });
                }
            };
            match result {
                Ok(content) => slots[index] = Some(content),
                Err(err) => {
                    let err = IssuanceError::from_call("key authorization", err);
                    if first_error.as_ref().is_none_or(|(seen, _)| index < *seen) {
                        first_error = Some((index, err));
                    }
                }
            }
        }
        if let Some((_, err)) = first_error {
            return Err(err);
        }

        slots
            .into_iter()
            .zip(challenges)
            .map(|(slot, challenge)| {
                slot.ok_or_else(|| IssuanceError::Authority {
                    stage: "key authorization",
                    source: AuthorityError::UnknownHandle(challenge.id.clone()),
                })
            })
            .collect()
    }
}

/// Picks the dns-01 challenge of every authorization, in order.
pub fn select_dns_challenges(
    authorizations: &[Authorization],
) -> Result<Vec<Challenge>, IssuanceError> {
    authorizations
        .iter()
        .map(|authz| {
            authz
                .dns_challenge()
                .cloned()
                .ok_or_else(|| IssuanceError::ChallengeNotFound {
                    identifier: authz.display_identifier(),
                })
        })
        .collect()
}
