use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::distribution::MaterializeError;
use crate::domain::DomainError;
use crate::storage::StorageError;

use super::authority::AuthorityError;
use super::cancel::CallError;
use super::keys::KeyError;
use super::poll::PollError;
use super::types::OrderStatus;

/// Stable, serializable classification of an [`IssuanceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidDomain,
    Authority,
    OrderCreationFailed,
    ChallengeNotFound,
    RecordProvisioningFailed,
    ChallengeVerificationFailed,
    OrderTimedOut,
    CertificateUnavailable,
    CertificateRetrievalFailed,
    KeyGenerationFailed,
    PersistenceError,
    Cancelled,
    SessionNotFound,
}

#[derive(Error, Debug)]
pub enum IssuanceError {
    #[error(transparent)]
    InvalidDomain(#[from] DomainError),

    #[error("failed to create order: {source}")]
    OrderCreation {
        #[source]
        source: AuthorityError,
    },

    #[error("certificate authority call failed during {stage}: {source}")]
    Authority {
        stage: &'static str,
        #[source]
        source: AuthorityError,
    },

    #[error("no dns-01 challenge offered for '{identifier}'")]
    ChallengeNotFound { identifier: String },

    #[error("TXT record provisioning failed ({created} record(s) created): {message}")]
    RecordProvisioning { created: usize, message: String },

    #[error("challenge verification failed for '{identifier}' during {step}: {source}")]
    ChallengeVerification {
        identifier: String,
        step: &'static str,
        #[source]
        source: PollError,
    },

    #[error("order did not become valid within {waited:?} (last status {last_status:?})")]
    OrderTimedOut {
        waited: Duration,
        last_status: OrderStatus,
    },

    #[error("certificate not available yet after {attempts} attempt(s)")]
    CertificateUnavailable { attempts: u32 },

    #[error("certificate retrieval failed: {message}")]
    CertificateRetrieval { message: String },

    #[error(transparent)]
    KeyGeneration(#[from] KeyError),

    #[error(transparent)]
    Persistence(#[from] StorageError),

    #[error("issuance cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("issuance session not found or already completed: {0}")]
    SessionNotFound(String),
}

impl IssuanceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IssuanceError::InvalidDomain(_) => ErrorKind::InvalidDomain,
            IssuanceError::Authority { .. } => ErrorKind::Authority,
            IssuanceError::OrderCreation { .. } => ErrorKind::OrderCreationFailed,
            IssuanceError::ChallengeNotFound { .. } => ErrorKind::ChallengeNotFound,
            IssuanceError::RecordProvisioning { .. } => ErrorKind::RecordProvisioningFailed,
            IssuanceError::ChallengeVerification { .. } => ErrorKind::ChallengeVerificationFailed,
            IssuanceError::OrderTimedOut { .. } => ErrorKind::OrderTimedOut,
            IssuanceError::CertificateUnavailable { .. } => ErrorKind::CertificateUnavailable,
            IssuanceError::CertificateRetrieval { .. } => ErrorKind::CertificateRetrievalFailed,
            IssuanceError::KeyGeneration(_) => ErrorKind::KeyGenerationFailed,
            IssuanceError::Persistence(_) => ErrorKind::PersistenceError,
            IssuanceError::Cancelled { .. } => ErrorKind::Cancelled,
            IssuanceError::SessionNotFound(_) => ErrorKind::SessionNotFound,
        }
    }

    /// Maps a guarded remote call failure onto the stage that issued it.
    pub fn from_call(stage: &'static str, err: CallError) -> Self {
        match err {
            CallError::Cancelled => IssuanceError::Cancelled { stage },
            CallError::Authority(source) => IssuanceError::Authority { stage, source },
        }
    }

    /// Malformed chains and unusable leaves are a retrieval failure; disk errors stay persistence errors.
    pub fn from_materialize(err: MaterializeError) -> Self {
        match err {
            MaterializeError::InvalidChain(message) | MaterializeError::Certificate(message) => {
                IssuanceError::CertificateRetrieval { message }
            }
            MaterializeError::Storage(source) => IssuanceError::Persistence(source),
        }
    }

    /// Only a not-yet-available certificate is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, IssuanceError::CertificateUnavailable { .. })
    }
}
