use std::env;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use dns01_issuer::issuance::dns_providers::{CloudflareProvider, DnsProvider, find_zone_id};
use reqwest::Client;
use serde::Deserialize;

#[derive(Clone)]
pub struct CloudflareTestConfig {
    pub token: String,
    pub zone: String,
}

#[derive(Deserialize, Clone)]
pub struct CloudflareDnsRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Deserialize)]
struct CloudflareDnsRecordListResponse {
    result: Vec<CloudflareDnsRecord>,
    success: bool,
}

pub fn load_cloudflare_config() -> Result<CloudflareTestConfig> {
    let token = env::var("DNS_TEST_CLOUDFLARE_TOKEN")
        .context("DNS_TEST_CLOUDFLARE_TOKEN not set")?;
    let zone =
        env::var("DNS_TEST_CLOUDFLARE_ZONE").context("DNS_TEST_CLOUDFLARE_ZONE not set")?;
    Ok(CloudflareTestConfig { token, zone })
}

pub fn provider(config: &CloudflareTestConfig) -> CloudflareProvider {
    CloudflareProvider::new(config.token.clone(), Duration::from_secs(30))
}

pub async fn zone_id(config: &CloudflareTestConfig) -> Result<String> {
    let zone = find_zone_id(&provider(config), &config.zone).await?;
    Ok(zone.id)
}

/// Domain whose `_acme-challenge` name is unique to one test.
pub fn test_domain(zone: &str, label: &str) -> String {
    format!("{}.integration-test.{}", label, zone)
}

pub fn expected_txt_content(value: &str) -> String {
    format!("\"{}\"", value.trim().trim_matches('"'))
}

/// Lists TXT records straight from the API, bypassing the provider under test.
pub async fn list_txt_records(
    config: &CloudflareTestConfig,
    zone_id: &str,
    record_name: &str,
) -> Result<Vec<CloudflareDnsRecord>> {
    let response = Client::new()
        .get(format!(
            "https://api.cloudflare.com/client/v4/zones/{}/dns_records",
            zone_id
        ))
        .query(&[("type", "TXT"), ("name", record_name)])
        .bearer_auth(&config.token)
        .send()
        .await
        .context("Failed to list Cloudflare DNS records")?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to list Cloudflare DNS records: {}",
            response.status()
        ));
    }

    let list_result: CloudflareDnsRecordListResponse = response
        .json()
        .await
        .context("Failed to parse Cloudflare DNS record list")?;
    if !list_result.success {
        return Err(anyhow!("Cloudflare API returned unsuccessful response"));
    }
    Ok(list_result.result)
}

/// Removes leftovers from earlier runs so each test starts clean.
pub async fn purge_txt_records(
    config: &CloudflareTestConfig,
    zone_id: &str,
    record_name: &str,
) -> Result<()> {
    let provider = provider(config);
    for record in list_txt_records(config, zone_id, record_name).await? {
        provider.delete_txt_record(zone_id, &record.id).await?;
    }
    Ok(())
}

pub async fn wait_for_record_content(
    config: &CloudflareTestConfig,
    zone_id: &str,
    record_name: &str,
    expected: &str,
) -> Result<CloudflareDnsRecord> {
    for _ in 0..5 {
        let records = list_txt_records(config, zone_id, record_name).await?;
        if let Some(record) = records
            .into_iter()
            .find(|record| record.content.as_deref() == Some(expected))
        {
            return Ok(record);
        }
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    Err(anyhow!(
        "Cloudflare record content did not match expected value"
    ))
}
