use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::types::{Authorization, Challenge, Order};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// The resource does not exist yet, e.g. a certificate URL before issuance completes.
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("certificate authority rejected the request: {0}")]
    Rejected(String),
    #[error("ACME protocol error: {0}")]
    Protocol(String),
    #[error("unknown resource handle: {0}")]
    UnknownHandle(String),
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),
}

impl AuthorityError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AuthorityError::NotFound(_))
    }
}

/// Operations the issuance engine needs from an ACME certificate authority.
///
/// Resources are passed around as snapshots; implementations map the `id` fields
/// back onto their live protocol state.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn create_order(&self, identifiers: &[String]) -> Result<Order, AuthorityError>;

    async fn authorizations(&self, order: &Order) -> Result<Vec<Authorization>, AuthorityError>;

    async fn deactivate_authorization(
        &self,
        authorization: &Authorization,
    ) -> Result<Authorization, AuthorityError>;

    /// The TXT value to publish for a DNS-01 challenge.
    async fn key_authorization(&self, challenge: &Challenge) -> Result<String, AuthorityError>;

    /// Checks that the published TXT record satisfies the challenge.
    async fn verify_challenge(
        &self,
        authorization: &Authorization,
        challenge: &Challenge,
    ) -> Result<(), AuthorityError>;

    /// Tells the CA the challenge is ready to be validated.
    async fn complete_challenge(&self, challenge: &Challenge) -> Result<Challenge, AuthorityError>;

    async fn refresh_authorization(
        &self,
        authorization: &Authorization,
    ) -> Result<Authorization, AuthorityError>;

    async fn refresh_challenge(&self, challenge: &Challenge) -> Result<Challenge, AuthorityError>;

    async fn finalize_order(&self, order: &Order, csr_der: &[u8]) -> Result<Order, AuthorityError>;

    async fn refresh_order(&self, order: &Order) -> Result<Order, AuthorityError>;

    /// Downloads the PEM chain. `NotFound` means the certificate is not available yet.
    async fn certificate(&self, order: &Order) -> Result<String, AuthorityError>;
}
