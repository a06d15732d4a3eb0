use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ACME_CHALLENGE_PREFIX: &str = "_acme-challenge.";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain name is required")]
    Empty,
    #[error("wildcard names are derived automatically; pass the base domain instead of '{0}'")]
    Wildcard(String),
    #[error("invalid domain name '{input}': {reason}")]
    Invalid { input: String, reason: String },
}

/// A base domain that is always ordered together with its wildcard form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Domain {
    ascii: String,
}

impl Domain {
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let trimmed = input.trim().trim_end_matches('.');
        if trimmed.is_empty() {
            return Err(DomainError::Empty);
        }
        if trimmed.starts_with("*.") {
            return Err(DomainError::Wildcard(trimmed.to_string()));
        }
        let ascii = normalize_domain_for_storage(trimmed)?;
        if !ascii.contains('.') {
            return Err(DomainError::Invalid {
                input: input.to_string(),
                reason: "at least two labels are required".to_string(),
            });
        }
        let valid_chars = ascii
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
        if !valid_chars || ascii.split('.').any(|label| label.is_empty()) {
            return Err(DomainError::Invalid {
                input: input.to_string(),
                reason: "labels may only contain letters, digits and hyphens".to_string(),
            });
        }
        Ok(Self { ascii })
    }

    pub fn as_str(&self) -> &str {
        &self.ascii
    }

    pub fn wildcard(&self) -> String {
        format!("*.{}", self.ascii)
    }

    /// Order identifiers: the base name first, then its wildcard.
    pub fn identifiers(&self) -> Vec<String> {
        vec![self.ascii.clone(), self.wildcard()]
    }

    pub fn record_name(&self) -> String {
        record_name(&self.ascii)
    }

    /// Unicode form for people reading output; storage and the CA use the ASCII form.
    pub fn display_name(&self) -> String {
        normalize_domain_for_display(&self.ascii)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ascii)
    }
}

impl TryFrom<String> for Domain {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Domain::parse(&value)
    }
}

impl From<Domain> for String {
    fn from(value: Domain) -> Self {
        value.ascii
    }
}

pub fn normalize_domain_for_storage(input: &str) -> Result<String, DomainError> {
    let trimmed = input.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(DomainError::Empty);
    }
    let ascii = idna::domain_to_ascii(trimmed).map_err(|err| DomainError::Invalid {
        input: input.to_string(),
        reason: err.to_string(),
    })?;
    Ok(ascii.to_lowercase())
}

pub fn normalize_domain_for_display(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('.');
    let (unicode, _) = idna::domain_to_unicode(trimmed);
    unicode.to_lowercase()
}

/// `_acme-challenge.<domain>`; the base name and its wildcard share one record.
pub fn record_name(domain: &str) -> String {
    let trimmed = domain.trim().trim_end_matches('.').trim_start_matches("*.");
    if trimmed.starts_with(ACME_CHALLENGE_PREFIX) {
        trimmed.to_string()
    } else {
        format!("{ACME_CHALLENGE_PREFIX}{trimmed}")
    }
}

pub fn matches_zone(domain: &str, zone_name: &str) -> bool {
    let domain = match normalize_domain_for_storage(domain.trim_start_matches("*.")) {
        Ok(value) => value,
        Err(_) => return false,
    };
    let zone_name = match normalize_domain_for_storage(zone_name) {
        Ok(value) => value,
        Err(_) => return false,
    };
    zone_name == domain || domain.ends_with(&format!(".{}", zone_name))
}
