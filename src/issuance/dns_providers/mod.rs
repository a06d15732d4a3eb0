use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::matches_zone;
use crate::issuance::types::TxtRecord;

mod cloudflare;
pub(crate) mod http;
mod memory;
mod retry;

pub use cloudflare::CloudflareProvider;
pub use memory::InMemoryDnsProvider;
pub use retry::{poll_dns_propagation, retry_provider_verification};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnsProviderError {
    #[error("{provider} authentication failed")]
    Unauthorized { provider: String },
    #[error("{provider} rate limit exceeded")]
    RateLimited { provider: String },
    #[error("{provider} API error: {message}")]
    Api { provider: String, message: String },
    #[error("{provider} request failed: {message}")]
    Transport { provider: String, message: String },
    #[error("no DNS zone found for {0}")]
    ZoneNotFound(String),
    #[error("TXT record {0} not found")]
    RecordNotFound(String),
    #[error("{0}")]
    Verification(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub expires_on: Option<String>,
}

/// Zone and TXT record operations of a DNS hosting API.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn list_zones(&self) -> Result<Vec<Zone>, DnsProviderError>;

    /// Creates one TXT record and returns the provider's record id.
    async fn create_txt_record(
        &self,
        zone_id: &str,
        name: &str,
        content: &str,
        ttl: u32,
    ) -> Result<String, DnsProviderError>;

    /// Deleting a record that is already gone succeeds.
    async fn delete_txt_record(&self, zone_id: &str, record_id: &str)
    -> Result<(), DnsProviderError>;

    async fn get_txt_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<Option<TxtRecord>, DnsProviderError>;

    async fn verify_token(&self) -> Result<TokenInfo, DnsProviderError>;
}

/// Picks the most specific zone hosting `domain`.
pub async fn find_zone_id(
    provider: &dyn DnsProvider,
    domain: &str,
) -> Result<Zone, DnsProviderError> {
    let zones = provider.list_zones().await?;
    select_zone(&zones, domain)
        .cloned()
        .ok_or_else(|| DnsProviderError::ZoneNotFound(domain.to_string()))
}

fn select_zone<'a>(zones: &'a [Zone], domain: &str) -> Option<&'a Zone> {
    zones
        .iter()
        .filter(|zone| matches_zone(domain, &zone.name))
        .max_by_key(|zone| zone.name.len())
}
