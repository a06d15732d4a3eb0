use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use instant_acme::{ChallengeType, Identifier, NewOrder};
use log::{debug, info, warn};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use super::acme::AcmeAccount;
use super::authority::{AuthorityError, CertificateAuthority};
use super::dns::{PropagationState, check_txt_record};
use super::types::{
    Authorization, AuthorizationStatus, Challenge, ChallengeStatus, Order, OrderStatus,
};
use crate::domain::record_name;

/// [`CertificateAuthority`] backed by an `instant-acme` account session.
///
/// Live orders are cached by URL; an order unknown to this process (e.g. one
/// restored from a saved session) is re-fetched from the CA on first use.
pub struct AcmeAuthority {
    session: AcmeAccount,
    orders: Mutex<HashMap<String, instant_acme::Order>>,
    client: Client,
    resolvers: Vec<String>,
}

/// TXT value for a DNS-01 challenge: base64url(SHA-256(key authorization)).
pub fn dns_txt_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

fn protocol_error(err: instant_acme::Error) -> AuthorityError {
    match &err {
        instant_acme::Error::Api(problem) if problem.status == Some(404) => {
            AuthorityError::NotFound(err.to_string())
        }
        instant_acme::Error::Api(_) => AuthorityError::Rejected(err.to_string()),
        _ => AuthorityError::Protocol(err.to_string()),
    }
}

fn order_status(status: &instant_acme::OrderStatus) -> OrderStatus {
    match status {
        instant_acme::OrderStatus::Pending => OrderStatus::Pending,
        instant_acme::OrderStatus::Ready => OrderStatus::Ready,
        instant_acme::OrderStatus::Processing => OrderStatus::Processing,
        instant_acme::OrderStatus::Valid => OrderStatus::Valid,
        _ => OrderStatus::Invalid,
    }
}

fn authorization_status(status: &instant_acme::AuthorizationStatus) -> AuthorizationStatus {
    match status {
        instant_acme::AuthorizationStatus::Pending => AuthorizationStatus::Pending,
        instant_acme::AuthorizationStatus::Valid => AuthorizationStatus::Valid,
        instant_acme::AuthorizationStatus::Deactivated => AuthorizationStatus::Deactivated,
        instant_acme::AuthorizationStatus::Expired => AuthorizationStatus::Expired,
        _ => AuthorizationStatus::Invalid,
    }
}

fn challenge_status(status: &instant_acme::ChallengeStatus) -> ChallengeStatus {
    match status {
        instant_acme::ChallengeStatus::Pending => ChallengeStatus::Pending,
        instant_acme::ChallengeStatus::Processing => ChallengeStatus::Processing,
        instant_acme::ChallengeStatus::Valid => ChallengeStatus::Valid,
        _ => ChallengeStatus::Invalid,
    }
}

fn challenge_kind(kind: &ChallengeType) -> String {
    match kind {
        ChallengeType::Dns01 => "dns-01".to_string(),
        ChallengeType::Http01 => "http-01".to_string(),
        ChallengeType::TlsAlpn01 => "tls-alpn-01".to_string(),
        other => format!("{other:?}").to_lowercase(),
    }
}

fn display_identifier(domain: &str, wildcard: bool) -> String {
    if wildcard {
        format!("*.{domain}")
    } else {
        domain.to_string()
    }
}

fn authorization_snapshot(
    order_url: &str,
    domain: &str,
    wildcard: bool,
    status: &instant_acme::AuthorizationStatus,
    challenges: &[instant_acme::Challenge],
) -> Authorization {
    let id = display_identifier(domain, wildcard);
    Authorization {
        id: id.clone(),
        order_id: order_url.to_string(),
        identifier: domain.to_string(),
        wildcard,
        status: authorization_status(status),
        challenges: challenges
            .iter()
            .map(|challenge| challenge_snapshot(order_url, &id, challenge))
            .collect(),
    }
}

fn challenge_snapshot(
    order_url: &str,
    authorization_id: &str,
    challenge: &instant_acme::Challenge,
) -> Challenge {
    Challenge {
        id: challenge.url.clone(),
        authorization_id: authorization_id.to_string(),
        order_id: order_url.to_string(),
        kind: challenge_kind(&challenge.r#type),
        token: challenge.token.clone(),
        status: challenge_status(&challenge.status),
        error: challenge.error.as_ref().map(|problem| format!("{problem:?}")),
    }
}

impl AcmeAuthority {
    pub fn new(session: AcmeAccount, client: Client, resolvers: Vec<String>) -> Self {
        Self {
            session,
            orders: Mutex::new(HashMap::new()),
            client,
            resolvers,
        }
    }

    async fn live_order<'a>(
        &self,
        orders: &'a mut HashMap<String, instant_acme::Order>,
        url: &str,
    ) -> Result<&'a mut instant_acme::Order, AuthorityError> {
        if !orders.contains_key(url) {
            debug!("[acme] restoring order {}", url);
            let order = self
                .session
                .account()
                .order(url.to_string())
                .await
                .map_err(protocol_error)?;
            orders.insert(url.to_string(), order);
        }
        orders
            .get_mut(url)
            .ok_or_else(|| AuthorityError::UnknownHandle(url.to_string()))
    }

    async fn order_snapshot(
        live: &mut instant_acme::Order,
        identifiers: Vec<String>,
    ) -> Result<Order, AuthorityError> {
        let url = live.url().to_string();
        let state = live.refresh().await.map_err(protocol_error)?;
        Ok(Order {
            id: url,
            status: order_status(&state.status),
            identifiers,
            error: state.error.as_ref().map(|problem| format!("{problem:?}")),
        })
    }

    /// Re-reads one authorization of `order_url`, identified by its display identifier.
    async fn fetch_authorization(
        &self,
        order_url: &str,
        authorization_id: &str,
    ) -> Result<Authorization, AuthorityError> {
        let mut orders = self.orders.lock().await;
        let live = self.live_order(&mut orders, order_url).await?;
        let mut authorizations = live.authorizations();
        while let Some(result) = authorizations.next().await {
            let authz = result.map_err(protocol_error)?;
            let identifier = authz.identifier();
            let Identifier::Dns(domain) = &identifier.identifier else {
                continue;
            };
            let wildcard = identifier.wildcard;
            if display_identifier(domain, wildcard) == authorization_id {
                return Ok(authorization_snapshot(
                    order_url,
                    domain,
                    wildcard,
                    &authz.status,
                    &authz.challenges,
                ));
            }
        }
        Err(AuthorityError::UnknownHandle(authorization_id.to_string()))
    }

    async fn dns_key_authorization(&self, challenge: &Challenge) -> Result<String, AuthorityError> {
        let mut orders = self.orders.lock().await;
        let live = self.live_order(&mut orders, &challenge.order_id).await?;
        let mut authorizations = live.authorizations();
        while let Some(result) = authorizations.next().await {
            let mut authz = result.map_err(protocol_error)?;
            if !authz.challenges.iter().any(|c| c.url == challenge.id) {
                continue;
            }
            let handle = authz.challenge(ChallengeType::Dns01).ok_or_else(|| {
                AuthorityError::UnknownHandle(format!("dns-01 challenge {}", challenge.id))
            })?;
            return Ok(handle.key_authorization().as_str().to_string());
        }
        Err(AuthorityError::UnknownHandle(challenge.id.clone()))
    }
}

#[async_trait]
impl CertificateAuthority for AcmeAuthority {
    async fn create_order(&self, identifiers: &[String]) -> Result<Order, AuthorityError> {
        let acme_identifiers: Vec<Identifier> = identifiers
            .iter()
            .map(|name| Identifier::Dns(name.clone()))
            .collect();
        let mut live = self
            .session
            .account()
            .new_order(&NewOrder::new(&acme_identifiers))
            .await
            .map_err(protocol_error)?;
        let snapshot = Self::order_snapshot(&mut live, identifiers.to_vec()).await?;
        info!(
            "[acme] created order {} for {:?} ({:?})",
            snapshot.id, identifiers, snapshot.status
        );
        self.orders.lock().await.insert(snapshot.id.clone(), live);
        Ok(snapshot)
    }

    async fn authorizations(&self, order: &Order) -> Result<Vec<Authorization>, AuthorityError> {
        let mut orders = self.orders.lock().await;
        let live = self.live_order(&mut orders, &order.id).await?;
        let mut authorizations = live.authorizations();
        let mut snapshots = Vec::new();
        while let Some(result) = authorizations.next().await {
            let authz = result.map_err(protocol_error)?;
            let identifier = authz.identifier();
            let Identifier::Dns(domain) = &identifier.identifier else {
                warn!("[acme] skipping non-DNS identifier in order {}", order.id);
                continue;
            };
            snapshots.push(authorization_snapshot(
                &order.id,
                domain,
                identifier.wildcard,
                &authz.status,
                &authz.challenges,
            ));
        }
        Ok(snapshots)
    }

    async fn deactivate_authorization(
        &self,
        authorization: &Authorization,
    ) -> Result<Authorization, AuthorityError> {
        {
            let mut orders = self.orders.lock().await;
            let live = self.live_order(&mut orders, &authorization.order_id).await?;
            let mut authorizations = live.authorizations();
            let mut found = false;
            while let Some(result) = authorizations.next().await {
                let mut authz = result.map_err(protocol_error)?;
                let identifier = authz.identifier();
                let matches = matches!(
                    &identifier.identifier,
                    Identifier::Dns(domain)
                        if display_identifier(domain, identifier.wildcard) == authorization.id
                );
                if matches {
                    authz.deactivate().await.map_err(protocol_error)?;
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(AuthorityError::UnknownHandle(authorization.id.clone()));
            }
        }
        info!("[acme] deactivated authorization for {}", authorization.id);
        Ok(Authorization {
            status: AuthorizationStatus::Deactivated,
            ..authorization.clone()
        })
    }

    async fn key_authorization(&self, challenge: &Challenge) -> Result<String, AuthorityError> {
        let key_authorization = self.dns_key_authorization(challenge).await?;
        Ok(dns_txt_value(&key_authorization))
    }

    async fn verify_challenge(
        &self,
        authorization: &Authorization,
        challenge: &Challenge,
    ) -> Result<(), AuthorityError> {
        let expected = self.key_authorization(challenge).await?;
        let name = record_name(&authorization.identifier);
        let result = check_txt_record(&self.client, &self.resolvers, &name, &expected).await;
        match result.state {
            PropagationState::Found => Ok(()),
            state => Err(AuthorityError::Rejected(format!(
                "TXT record {} is not resolvable with the expected value ({:?}: {})",
                name,
                state,
                result.reason.unwrap_or_default()
            ))),
        }
    }

    async fn complete_challenge(&self, challenge: &Challenge) -> Result<Challenge, AuthorityError> {
        {
            let mut orders = self.orders.lock().await;
            let live = self.live_order(&mut orders, &challenge.order_id).await?;
            let mut authorizations = live.authorizations();
            let mut found = false;
            while let Some(result) = authorizations.next().await {
                let mut authz = result.map_err(protocol_error)?;
                if !authz.challenges.iter().any(|c| c.url == challenge.id) {
                    continue;
                }
                let mut handle = authz.challenge(ChallengeType::Dns01).ok_or_else(|| {
                    AuthorityError::UnknownHandle(format!("dns-01 challenge {}", challenge.id))
                })?;
                handle.set_ready().await.map_err(protocol_error)?;
                found = true;
                break;
            }
            if !found {
                return Err(AuthorityError::UnknownHandle(challenge.id.clone()));
            }
        }
        debug!("[acme] challenge {} marked ready", challenge.id);
        self.refresh_challenge(challenge).await
    }

    async fn refresh_authorization(
        &self,
        authorization: &Authorization,
    ) -> Result<Authorization, AuthorityError> {
        self.fetch_authorization(&authorization.order_id, &authorization.id)
            .await
    }

    async fn refresh_challenge(&self, challenge: &Challenge) -> Result<Challenge, AuthorityError> {
        let authorization = self
            .fetch_authorization(&challenge.order_id, &challenge.authorization_id)
            .await?;
        authorization
            .challenges
            .into_iter()
            .find(|candidate| candidate.id == challenge.id)
            .ok_or_else(|| AuthorityError::UnknownHandle(challenge.id.clone()))
    }

    async fn finalize_order(&self, order: &Order, csr_der: &[u8]) -> Result<Order, AuthorityError> {
        let mut orders = self.orders.lock().await;
        let live = self.live_order(&mut orders, &order.id).await?;
        live.finalize_csr(csr_der).await.map_err(protocol_error)?;
        info!("[acme] submitted CSR for order {}", order.id);
        Self::order_snapshot(live, order.identifiers.clone()).await
    }

    async fn refresh_order(&self, order: &Order) -> Result<Order, AuthorityError> {
        let mut orders = self.orders.lock().await;
        let live = self.live_order(&mut orders, &order.id).await?;
        Self::order_snapshot(live, order.identifiers.clone()).await
    }

    async fn certificate(&self, order: &Order) -> Result<String, AuthorityError> {
        let mut orders = self.orders.lock().await;
        let live = self.live_order(&mut orders, &order.id).await?;
        match live.certificate().await.map_err(protocol_error)? {
            Some(chain) => Ok(chain),
            None => Err(AuthorityError::NotFound(format!(
                "certificate for order {} is not available yet",
                order.id
            ))),
        }
    }
}
