use serde::{Deserialize, Serialize};

pub const DNS_01: &str = "dns-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// Snapshot of a CA order. `id` is the collaborator's handle (the order URL for ACME).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
    pub identifiers: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub id: String,
    pub order_id: String,
    /// Name without the wildcard prefix; see `wildcard`.
    pub identifier: String,
    pub wildcard: bool,
    pub status: AuthorizationStatus,
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    pub fn display_identifier(&self) -> String {
        if self.wildcard {
            format!("*.{}", self.identifier)
        } else {
            self.identifier.clone()
        }
    }

    pub fn dns_challenge(&self) -> Option<&Challenge> {
        self.challenges.iter().find(|challenge| challenge.kind == DNS_01)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub authorization_id: String,
    pub order_id: String,
    /// ACME challenge type, e.g. `dns-01`.
    pub kind: String,
    pub token: String,
    pub status: ChallengeStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// A TXT value the caller must publish before the challenge can be validated.
/// Positionally aligned with the authorization list it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedChallenge {
    pub identifier: String,
    pub record_name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxtRecord {
    pub id: String,
    pub zone_id: String,
    pub name: String,
    pub content: String,
}

/// Outcome of a status poll step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    Done,
    Pending,
    Failed(String),
}

/// Resources whose status can be polled until valid.
pub trait StatusResource {
    fn poll_state(&self) -> PollState;
    fn status_label(&self) -> String;
}

impl StatusResource for Authorization {
    fn poll_state(&self) -> PollState {
        match self.status {
            AuthorizationStatus::Valid => PollState::Done,
            AuthorizationStatus::Pending => PollState::Pending,
            other => PollState::Failed(format!(
                "authorization for {} is {:?}",
                self.display_identifier(),
                other
            )),
        }
    }

    fn status_label(&self) -> String {
        format!("{:?}", self.status).to_lowercase()
    }
}

impl StatusResource for Challenge {
    fn poll_state(&self) -> PollState {
        match self.status {
            ChallengeStatus::Valid => PollState::Done,
            ChallengeStatus::Pending | ChallengeStatus::Processing => PollState::Pending,
            ChallengeStatus::Invalid => PollState::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| format!("challenge {} is invalid", self.id)),
            ),
        }
    }

    fn status_label(&self) -> String {
        format!("{:?}", self.status).to_lowercase()
    }
}

/// Orders are "done" for the pre-finalization wait once they are ready (or already valid).
impl StatusResource for Order {
    fn poll_state(&self) -> PollState {
        match self.status {
            OrderStatus::Ready | OrderStatus::Valid => PollState::Done,
            OrderStatus::Pending | OrderStatus::Processing => PollState::Pending,
            OrderStatus::Invalid => PollState::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| format!("order {} is invalid", self.id)),
            ),
        }
    }

    fn status_label(&self) -> String {
        format!("{:?}", self.status).to_lowercase()
    }
}
