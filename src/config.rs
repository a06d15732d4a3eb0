use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::issuance::poll::Backoff;

pub const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";
pub const GOOGLE_DOH: &str = "https://dns.google/resolve";
pub const CLOUDFLARE_DOH: &str = "https://cloudflare-dns.com/dns-query";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
const MAX_TXT_TTL: u32 = 60;

pub const ENV_DIRECTORY_URL: &str = "DNS01_DIRECTORY_URL";
pub const ENV_CONTACT_EMAIL: &str = "DNS01_CONTACT_EMAIL";
pub const ENV_STORAGE_DIR: &str = "DNS01_STORAGE_DIR";
pub const ENV_CLOUDFLARE_TOKEN: &str = "CLOUDFLARE_API_TOKEN";
pub const ENV_HTTP_TIMEOUT: &str = "DNS01_HTTP_TIMEOUT_SECS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub min_secs: u64,
    pub max_secs: u64,
    pub attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_secs: 10,
            max_secs: 10,
            attempts: 10,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerConfig {
    pub directory_url: String,
    pub contact_email: Option<String>,
    pub storage_dir: PathBuf,
    #[serde(skip_serializing)]
    pub cloudflare_api_token: Option<String>,
    pub cloudflare_api_base: String,
    pub http_timeout_secs: u64,
    /// Upper bound for a single CA or DNS round trip.
    pub call_timeout_secs: u64,
    pub authorization_backoff: BackoffConfig,
    pub order_poll_interval_secs: u64,
    pub order_max_wait_secs: u64,
    pub certificate_retry_delay_secs: u64,
    pub certificate_max_attempts: u32,
    pub record_ttl: u32,
    /// Wait for public DNS to serve the TXT records before verification. 0 disables the wait.
    pub propagation_timeout_secs: u64,
    pub propagation_interval_secs: u64,
    pub doh_resolvers: Vec<String>,
}

impl Default for IssuerConfig {
    fn default() -> Self {
        Self {
            directory_url: LETS_ENCRYPT_STAGING.to_string(),
            contact_email: None,
            storage_dir: PathBuf::from("./acme-data"),
            cloudflare_api_token: None,
            cloudflare_api_base: CLOUDFLARE_API_BASE.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            call_timeout_secs: 60,
            authorization_backoff: BackoffConfig::default(),
            order_poll_interval_secs: 5,
            order_max_wait_secs: 300,
            certificate_retry_delay_secs: 5,
            certificate_max_attempts: 12,
            record_ttl: MAX_TXT_TTL,
            propagation_timeout_secs: 0,
            propagation_interval_secs: 10,
            doh_resolvers: vec![GOOGLE_DOH.to_string(), CLOUDFLARE_DOH.to_string()],
        }
    }
}

impl std::fmt::Debug for IssuerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuerConfig")
            .field("directory_url", &self.directory_url)
            .field("contact_email", &self.contact_email)
            .field("storage_dir", &self.storage_dir)
            .field(
                "cloudflare_api_token",
                &self.cloudflare_api_token.as_ref().map(|_| "<redacted>"),
            )
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("record_ttl", &self.record_ttl)
            .finish_non_exhaustive()
    }
}

impl IssuerConfig {
    /// Reads the optional JSON file, applies environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = non_empty(ENV_DIRECTORY_URL) {
            self.directory_url = url;
        }
        if let Some(email) = non_empty(ENV_CONTACT_EMAIL) {
            self.contact_email = Some(email);
        }
        if let Some(dir) = non_empty(ENV_STORAGE_DIR) {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(token) = non_empty(ENV_CLOUDFLARE_TOKEN) {
            self.cloudflare_api_token = Some(token);
        }
        if let Some(raw) = non_empty(ENV_HTTP_TIMEOUT) {
            self.http_timeout_secs = resolve_timeout_secs(&raw);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("directory_url", &self.directory_url)?;
        check_url("cloudflare_api_base", &self.cloudflare_api_base)?;
        for resolver in &self.doh_resolvers {
            check_url("doh_resolvers", resolver)?;
        }
        let backoff = &self.authorization_backoff;
        if backoff.attempts == 0 {
            return Err(invalid("authorization_backoff.attempts must be at least 1"));
        }
        if backoff.min_secs == 0 || backoff.max_secs == 0 {
            return Err(invalid("authorization backoff intervals must be positive"));
        }
        if backoff.min_secs > backoff.max_secs {
            return Err(invalid(
                "authorization_backoff.min_secs must not exceed max_secs",
            ));
        }
        if self.order_poll_interval_secs == 0 || self.certificate_retry_delay_secs == 0 {
            return Err(invalid("poll intervals must be positive"));
        }
        if self.order_max_wait_secs == 0 || self.certificate_max_attempts == 0 {
            return Err(invalid("poll limits must be positive"));
        }
        if self.http_timeout_secs == 0 || self.call_timeout_secs == 0 {
            return Err(invalid("timeouts must be positive"));
        }
        if !(1..=MAX_TXT_TTL).contains(&self.record_ttl) {
            return Err(invalid(format!(
                "record_ttl must be between 1 and {MAX_TXT_TTL} seconds"
            )));
        }
        if self.propagation_timeout_secs > 0 && self.propagation_interval_secs == 0 {
            return Err(invalid("propagation_interval_secs must be positive"));
        }
        if let Some(email) = &self.contact_email {
            if !email.contains('@') {
                return Err(invalid(format!("contact email '{email}' is not valid")));
            }
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let propagation = (self.propagation_timeout_secs > 0).then(|| PropagationSettings {
            timeout: Duration::from_secs(self.propagation_timeout_secs),
            interval: Duration::from_secs(self.propagation_interval_secs),
        });
        EngineSettings {
            authorization_backoff: Backoff::new(
                Duration::from_secs(self.authorization_backoff.min_secs),
                Duration::from_secs(self.authorization_backoff.max_secs),
                self.authorization_backoff.attempts,
            ),
            order_poll_interval: Duration::from_secs(self.order_poll_interval_secs),
            order_max_wait: Duration::from_secs(self.order_max_wait_secs),
            certificate_retry_delay: Duration::from_secs(self.certificate_retry_delay_secs),
            certificate_max_attempts: self.certificate_max_attempts,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            record_ttl: self.record_ttl,
            propagation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

/// Timing knobs shared by the issuance stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub authorization_backoff: Backoff,
    pub order_poll_interval: Duration,
    pub order_max_wait: Duration,
    pub certificate_retry_delay: Duration,
    pub certificate_max_attempts: u32,
    pub call_timeout: Duration,
    pub record_ttl: u32,
    pub propagation: Option<PropagationSettings>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        IssuerConfig::default().engine_settings()
    }
}

fn resolve_timeout_secs(raw: &str) -> u64 {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => {
            warn!("[config] invalid {ENV_HTTP_TIMEOUT} value '{raw}'; using default");
            DEFAULT_HTTP_TIMEOUT_SECS
        }
        Ok(value) => value,
    }
}

fn check_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|err| invalid(format!("{field} '{value}' is not a valid URL: {err}")))?;
    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(invalid(format!("{field} '{value}' must use http or https")));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}
