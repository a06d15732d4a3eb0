use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{DnsProvider, DnsProviderError, TokenInfo, Zone, http, retry_provider_verification};
use crate::config::CLOUDFLARE_API_BASE;
use crate::issuance::types::TxtRecord;

const PROVIDER: &str = "Cloudflare";
const DUPLICATE_RECORD_CODE: u32 = 81058;
const ZONES_PER_PAGE: u32 = 50;

pub struct CloudflareProvider {
    api_token: String,
    base_url: String,
    client: Client,
}

#[derive(Deserialize)]
struct CloudflareEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<CloudflareError>,
    result: Option<T>,
    #[serde(default)]
    result_info: Option<ResultInfo>,
}

#[derive(Deserialize)]
struct CloudflareError {
    code: u32,
    message: String,
}

#[derive(Deserialize)]
struct ResultInfo {
    #[serde(default)]
    total_pages: Option<u32>,
}

#[derive(Deserialize)]
struct CloudflareZone {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct CloudflareDnsRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'a str,
    name: &'a str,
    content: String,
    ttl: u32,
}

#[derive(Deserialize)]
struct CloudflareDnsRecordResult {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CloudflareTokenStatus {
    id: String,
    status: String,
    #[serde(default)]
    expires_on: Option<String>,
}

impl CloudflareProvider {
    pub fn new(api_token: String, timeout: Duration) -> Self {
        Self::with_base_url(api_token, CLOUDFLARE_API_BASE.to_string(), timeout)
    }

    pub fn with_base_url(api_token: String, base_url: String, timeout: Duration) -> Self {
        Self {
            api_token,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: http::build_client(timeout),
        }
    }

    fn format_txt_content(value: &str) -> String {
        let trimmed = value.trim();
        if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
            trimmed.to_string()
        } else {
            format!("\"{}\"", trimmed.trim_matches('"'))
        }
    }

    fn unquote(value: &str) -> String {
        value.trim().trim_matches('"').to_string()
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.api_token)
            .header("Content-Type", "application/json")
    }

    /// Sends a request and unwraps the v4 envelope. `Ok(None)` means HTTP 404.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        action: &str,
    ) -> Result<Option<CloudflareEnvelope<T>>, DnsProviderError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|err| http::transport_error(PROVIDER, err))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .text()
            .await
            .map_err(|err| http::transport_error(PROVIDER, err))?;
        if !status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<CloudflareEnvelope<serde_json::Value>>(&body)
            {
                if parsed.errors.iter().any(|err| err.code == DUPLICATE_RECORD_CODE) {
                    return Ok(Some(CloudflareEnvelope {
                        success: false,
                        errors: parsed.errors,
                        result: None,
                        result_info: None,
                    }));
                }
            }
            warn!("[cloudflare] {} failed with status {}", action, status);
            return Err(http::status_error(PROVIDER, status, Some(body)));
        }
        let envelope: CloudflareEnvelope<T> =
            serde_json::from_str(&body).map_err(|err| DnsProviderError::Api {
                provider: PROVIDER.to_string(),
                message: format!("failed to parse {action} response: {err}"),
            })?;
        Ok(Some(envelope))
    }

    fn envelope_error<T>(envelope: &CloudflareEnvelope<T>) -> DnsProviderError {
        let message = if envelope.errors.is_empty() {
            "Unknown error".to_string()
        } else {
            envelope
                .errors
                .iter()
                .map(|err| format!("{}: {}", err.code, err.message))
                .collect::<Vec<_>>()
                .join(", ")
        };
        DnsProviderError::Api {
            provider: PROVIDER.to_string(),
            message,
        }
    }

    async fn list_txt_records(
        &self,
        zone_id: &str,
        name: &str,
    ) -> Result<Vec<CloudflareDnsRecordResult>, DnsProviderError> {
        let url = format!("{}/zones/{}/dns_records", self.base_url, zone_id);
        let request = self
            .client
            .get(url)
            .query(&[("type", "TXT"), ("name", name)]);
        let envelope = self
            .send::<Vec<CloudflareDnsRecordResult>>(request, "list TXT records")
            .await?
            .ok_or_else(|| DnsProviderError::ZoneNotFound(zone_id.to_string()))?;
        if !envelope.success {
            return Err(Self::envelope_error(&envelope));
        }
        Ok(envelope.result.unwrap_or_default())
    }

    /// Cloudflare rejects an identical record; reuse the one already published.
    async fn existing_record_id(
        &self,
        zone_id: &str,
        name: &str,
        formatted: &str,
    ) -> Result<String, DnsProviderError> {
        let records = self.list_txt_records(zone_id, name).await?;
        records
            .into_iter()
            .find(|record| record.content.as_deref().map(Self::unquote) == Some(Self::unquote(formatted)))
            .map(|record| record.id)
            .ok_or_else(|| DnsProviderError::RecordNotFound(name.to_string()))
    }

    async fn verify_record_content(
        &self,
        zone_id: &str,
        record_id: &str,
        expected: &str,
    ) -> Result<(), DnsProviderError> {
        let expected = Self::unquote(expected);
        retry_provider_verification(
            &format!("record {record_id}"),
            "Cloudflare record",
            Duration::from_secs(2),
            Duration::from_millis(300),
            || {
                let expected = expected.clone();
                async move {
                    let record = self.get_txt_record(zone_id, record_id).await?;
                    Ok(record.is_some_and(|record| Self::unquote(&record.content) == expected))
                }
            },
        )
        .await
    }
}

#[async_trait]
impl DnsProvider for CloudflareProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn list_zones(&self) -> Result<Vec<Zone>, DnsProviderError> {
        let mut zones = Vec::new();
        let mut page = 1;
        loop {
            let request = self.client.get(format!("{}/zones", self.base_url)).query(&[
                ("page", page.to_string()),
                ("per_page", ZONES_PER_PAGE.to_string()),
            ]);
            let envelope = self
                .send::<Vec<CloudflareZone>>(request, "list zones")
                .await?
                .ok_or_else(|| DnsProviderError::Api {
                    provider: PROVIDER.to_string(),
                    message: "zones endpoint not found".to_string(),
                })?;
            if !envelope.success {
                return Err(Self::envelope_error(&envelope));
            }
            let total_pages = envelope
                .result_info
                .as_ref()
                .and_then(|info| info.total_pages)
                .unwrap_or(1);
            zones.extend(
                envelope
                    .result
                    .unwrap_or_default()
                    .into_iter()
                    .map(|zone| Zone {
                        id: zone.id,
                        name: zone.name,
                    }),
            );
            if page >= total_pages {
                break;
            }
            page += 1;
        }
        debug!("[cloudflare] listed {} zone(s)", zones.len());
        Ok(zones)
    }

    async fn create_txt_record(
        &self,
        zone_id: &str,
        name: &str,
        content: &str,
        ttl: u32,
    ) -> Result<String, DnsProviderError> {
        let formatted = Self::format_txt_content(content);
        let record = CloudflareDnsRecord {
            record_type: "TXT",
            name,
            content: formatted.clone(),
            ttl,
        };
        let request = self
            .client
            .post(format!("{}/zones/{}/dns_records", self.base_url, zone_id))
            .json(&record);
        let envelope = self
            .send::<CloudflareDnsRecordResult>(request, "create TXT record")
            .await?
            .ok_or_else(|| DnsProviderError::ZoneNotFound(zone_id.to_string()))?;

        let record_id = if envelope.success {
            envelope
                .result
                .map(|result| result.id)
                .ok_or_else(|| DnsProviderError::Api {
                    provider: PROVIDER.to_string(),
                    message: "API did not return a record id".to_string(),
                })?
        } else if envelope
            .errors
            .iter()
            .any(|err| err.code == DUPLICATE_RECORD_CODE)
        {
            debug!("[cloudflare] identical TXT record already exists at {}", name);
            self.existing_record_id(zone_id, name, &formatted).await?
        } else {
            return Err(Self::envelope_error(&envelope));
        };

        self.verify_record_content(zone_id, &record_id, &formatted)
            .await?;
        info!("[cloudflare] created TXT record {} at {}", record_id, name);
        Ok(record_id)
    }

    async fn delete_txt_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<(), DnsProviderError> {
        let request = self.client.delete(format!(
            "{}/zones/{}/dns_records/{}",
            self.base_url, zone_id, record_id
        ));
        match self.send::<serde_json::Value>(request, "delete TXT record").await? {
            None => {
                debug!("[cloudflare] record {} already deleted (404)", record_id);
                Ok(())
            }
            Some(envelope) if envelope.success => {
                info!("[cloudflare] deleted TXT record {}", record_id);
                Ok(())
            }
            Some(envelope) => Err(Self::envelope_error(&envelope)),
        }
    }

    async fn get_txt_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<Option<TxtRecord>, DnsProviderError> {
        let request = self.client.get(format!(
            "{}/zones/{}/dns_records/{}",
            self.base_url, zone_id, record_id
        ));
        let Some(envelope) = self
            .send::<CloudflareDnsRecordResult>(request, "get TXT record")
            .await?
        else {
            return Ok(None);
        };
        if !envelope.success {
            return Err(Self::envelope_error(&envelope));
        }
        Ok(envelope.result.map(|result| TxtRecord {
            id: result.id,
            zone_id: zone_id.to_string(),
            name: result.name.unwrap_or_default(),
            content: result.content.map(|c| Self::unquote(&c)).unwrap_or_default(),
        }))
    }

    async fn verify_token(&self) -> Result<TokenInfo, DnsProviderError> {
        let request = self
            .client
            .get(format!("{}/user/tokens/verify", self.base_url));
        let envelope = self
            .send::<CloudflareTokenStatus>(request, "verify token")
            .await?
            .ok_or_else(|| DnsProviderError::Unauthorized {
                provider: PROVIDER.to_string(),
            })?;
        if !envelope.success {
            return Err(Self::envelope_error(&envelope));
        }
        let status = envelope.result.ok_or_else(|| DnsProviderError::Api {
            provider: PROVIDER.to_string(),
            message: "token verification returned no result".to_string(),
        })?;
        Ok(TokenInfo {
            id: status.id,
            status: status.status,
            expires_on: status.expires_on,
        })
    }
}
