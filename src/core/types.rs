use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::issuance::types::PublishedChallenge;

/// Tagged result printed by every command.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandOutcome {
    Ok {
        command: String,
        data: Value,
    },
    Error {
        command: String,
        kind: String,
        message: String,
        /// Partial results worth keeping, e.g. record ids that need cleanup.
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
}

impl CommandOutcome {
    pub fn ok(command: &str, data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => CommandOutcome::Ok {
                command: command.to_string(),
                data,
            },
            Err(err) => CommandOutcome::error(command, "internal", err.to_string(), None),
        }
    }

    pub fn error(
        command: &str,
        kind: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        CommandOutcome::Error {
            command: command.to_string(),
            kind: kind.into(),
            message: message.into(),
            details,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CommandOutcome::Ok { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneIdResponse {
    pub domain: String,
    pub zone_id: String,
    pub zone_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestResponse {
    pub session_id: String,
    pub domain: String,
    pub display_domain: String,
    pub order_url: String,
    pub record_name: String,
    pub challenges: Vec<PublishedChallenge>,
    pub session_file: PathBuf,
}
