use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;

use super::cancel::CancelToken;
use super::dns_providers::DnsProvider;
use crate::domain::record_name;

const CANCELLED: &str = "cancelled";

/// Result of publishing challenge values. `record_ids` holds every record that
/// was created, in input order, even when `success` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionOutcome {
    pub success: bool,
    pub record_name: String,
    pub record_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionOutcome {
    pub success: bool,
    pub deleted: Vec<String>,
    /// The record whose deletion failed; later ids were not attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Creates and removes `_acme-challenge` TXT records.
pub struct TxtRecordProvisioner {
    provider: Arc<dyn DnsProvider>,
    ttl: u32,
}

impl TxtRecordProvisioner {
    pub fn new(provider: Arc<dyn DnsProvider>, ttl: u32) -> Self {
        Self { provider, ttl }
    }

    /// Publishes one TXT record per content value, sequentially.
    ///
    /// Stops at the first failure or cancellation without rolling back what was created.
    pub async fn create(
        &self,
        zone_id: &str,
        domain: &str,
        contents: &[String],
        cancel: &CancelToken,
    ) -> ProvisionOutcome {
        let name = record_name(domain);
        let mut record_ids = Vec::with_capacity(contents.len());

        for (index, content) in contents.iter().enumerate() {
            let created = cancel
                .guard(
                    self.provider
                        .create_txt_record(zone_id, &name, content, self.ttl),
                )
                .await;
            match created {
                None => {
                    warn!(
                        "[provision] cancelled before TXT {} ({}/{}); {} record(s) left for cleanup",
                        name,
                        index + 1,
                        contents.len(),
                        record_ids.len()
                    );
                    return ProvisionOutcome {
                        success: false,
                        record_name: name,
                        record_ids,
                        error: Some(CANCELLED.to_string()),
                    };
                }
                Some(Ok(id)) => {
                    debug!(
                        "[provision] created {} record {} ({}/{})",
                        self.provider.name(),
                        id,
                        index + 1,
                        contents.len()
                    );
                    record_ids.push(id);
                }
                Some(Err(err)) => {
                    warn!(
                        "[provision] failed to create TXT {} ({}/{}): {}; {} record(s) left for cleanup",
                        name,
                        index + 1,
                        contents.len(),
                        err,
                        record_ids.len()
                    );
                    return ProvisionOutcome {
                        success: false,
                        record_name: name,
                        record_ids,
                        error: Some(err.to_string()),
                    };
                }
            }
        }

        info!(
            "[provision] published {} TXT record(s) at {}",
            record_ids.len(),
            name
        );
        ProvisionOutcome {
            success: true,
            record_name: name,
            record_ids,
            error: None,
        }
    }

    /// Deletes records in order, stopping at the first failure or cancellation.
    pub async fn delete(
        &self,
        zone_id: &str,
        record_ids: &[String],
        cancel: &CancelToken,
    ) -> DeletionOutcome {
        let mut deleted = Vec::with_capacity(record_ids.len());

        for id in record_ids {
            match cancel
                .guard(self.provider.delete_txt_record(zone_id, id))
                .await
            {
                None => {
                    warn!(
                        "[provision] cancelled before deleting record {}; {} remaining not attempted",
                        id,
                        record_ids.len() - deleted.len()
                    );
                    return DeletionOutcome {
                        success: false,
                        deleted,
                        failed: Some(id.clone()),
                        error: Some(CANCELLED.to_string()),
                    };
                }
                Some(Ok(())) => {
                    debug!("[provision] deleted record {}", id);
                    deleted.push(id.clone());
                }
                Some(Err(err)) => {
                    warn!(
                        "[provision] failed to delete record {}: {}; {} remaining not attempted",
                        id,
                        err,
                        record_ids.len() - deleted.len() - 1
                    );
                    return DeletionOutcome {
                        success: false,
                        deleted,
                        failed: Some(id.clone()),
                        error: Some(err.to_string()),
                    };
                }
            }
        }

        info!("[provision] deleted {} TXT record(s)", deleted.len());
        DeletionOutcome {
            success: true,
            deleted,
            failed: None,
            error: None,
        }
    }
}
