use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::time::Instant;

use super::authority::CertificateAuthority;
use super::cancel::{CallError, CancelToken};
use super::error::IssuanceError;
use super::keys::{self, KeyMaterial};
use super::poll::{PollError, poll_order_until_valid, retry_transient, wait_for_valid};
use super::types::{Order, OrderStatus};
use crate::config::EngineSettings;
use crate::domain::Domain;
use crate::storage::StorageLayout;
use crate::storage::layout::{read_optional, write_secure_file};

#[derive(Debug, Clone)]
pub struct FinalizedOrder {
    pub order: Order,
    pub chain_pem: String,
    pub key_reused: bool,
}

pub struct OrderFinalizer {
    authority: Arc<dyn CertificateAuthority>,
    layout: StorageLayout,
    settings: EngineSettings,
}

impl OrderFinalizer {
    pub fn new(
        authority: Arc<dyn CertificateAuthority>,
        layout: StorageLayout,
        settings: EngineSettings,
    ) -> Self {
        Self {
            authority,
            layout,
            settings,
        }
    }

    /// Submits the CSR, waits for the order to become valid and downloads the chain.
    pub async fn finalize(
        &self,
        order: &Order,
        domain: &Domain,
        cancel: &CancelToken,
    ) -> Result<FinalizedOrder, IssuanceError> {
        let (material, key_reused) = self.key_material(domain)?;

        let ready = self.wait_until_ready(order, cancel).await?;
        let submitted = if ready.status == OrderStatus::Valid {
            debug!("[finalize] order {} already valid; skipping CSR submission", ready.id);
            ready
        } else {
            info!("[finalize] submitting CSR for {}", domain);
            cancel
                .call(
                    self.settings.call_timeout,
                    self.authority.finalize_order(&ready, &material.csr_der),
                )
                .await
                .map_err(|err| IssuanceError::from_call("finalize order", err))?
        };

        let valid = if submitted.status == OrderStatus::Valid {
            submitted
        } else {
            poll_order_until_valid(
                self.authority.as_ref(),
                &submitted,
                self.settings.order_poll_interval,
                self.settings.order_max_wait,
                self.settings.call_timeout,
                cancel,
            )
            .await?
        };

        let chain_pem = self.download_certificate(&valid, cancel).await?;
        info!("[finalize] certificate issued for {}", domain);
        Ok(FinalizedOrder {
            order: valid,
            chain_pem,
            key_reused,
        })
    }

    /// Reuses the persisted key and CSR when both exist, otherwise generates and persists new ones.
    pub fn key_material(&self, domain: &Domain) -> Result<(KeyMaterial, bool), IssuanceError> {
        let key_path = self.layout.private_key(domain);
        let csr_path = self.layout.csr(domain);
        if let (Some(key_pem), Some(csr_pem)) = (read_optional(&key_path)?, read_optional(&csr_path)?) {
            match keys::load_key_material(&key_pem, &csr_pem) {
                Ok(material) => {
                    info!("[finalize] reusing stored key and CSR for {}", domain);
                    return Ok((material, true));
                }
                Err(err) => warn!(
                    "[finalize] stored key material for {} is unusable ({}); generating new",
                    domain, err
                ),
            }
        }

        let material = keys::generate_key_material(domain)?;
        write_secure_file(&key_path, material.private_key_pem.as_bytes())?;
        write_secure_file(&csr_path, material.csr_pem.as_bytes())?;
        info!("[finalize] generated new key and CSR for {}", domain);
        if let Some(stale) = self.stale_certificate(domain) {
            warn!(
                "[finalize] {} was issued for the previous key and is kept; it no longer matches privkey.pem",
                stale.display()
            );
        }
        Ok((material, false))
    }

    /// Existing certificate that write-once storage will keep after a key change.
    fn stale_certificate(&self, domain: &Domain) -> Option<PathBuf> {
        let path = self.layout.certificate(domain);
        path.exists().then_some(path)
    }

    async fn wait_until_ready(
        &self,
        order: &Order,
        cancel: &CancelToken,
    ) -> Result<Order, IssuanceError> {
        if matches!(order.status, OrderStatus::Ready | OrderStatus::Valid) {
            return Ok(order.clone());
        }
        let started = Instant::now();
        wait_for_valid(
            &format!("order {}", order.id),
            &self.settings.authorization_backoff,
            self.settings.call_timeout,
            cancel,
            || self.authority.refresh_order(order),
        )
        .await
        .map_err(|err| match err {
            PollError::Cancelled => IssuanceError::Cancelled { stage: "finalize" },
            PollError::Invalid(message) => IssuanceError::CertificateRetrieval { message },
            PollError::Exhausted { last_status, .. } => IssuanceError::OrderTimedOut {
                waited: started.elapsed(),
                last_status: if last_status == "processing" {
                    OrderStatus::Processing
                } else {
                    OrderStatus::Pending
                },
            },
            PollError::Authority(source) => IssuanceError::Authority {
                stage: "refresh order",
                source,
            },
        })
    }

    async fn download_certificate(
        &self,
        order: &Order,
        cancel: &CancelToken,
    ) -> Result<String, IssuanceError> {
        retry_transient(
            "certificate",
            self.settings.certificate_retry_delay,
            self.settings.certificate_max_attempts,
            cancel,
            |attempt| async move {
                match cancel
                    .call(self.settings.call_timeout, self.authority.certificate(order))
                    .await
                {
                    Ok(chain) => Ok(chain),
                    Err(CallError::Authority(err)) if err.is_not_found() => {
                        debug!("[finalize] certificate not ready on attempt {}", attempt);
                        Err(IssuanceError::CertificateUnavailable { attempts: attempt })
                    }
                    Err(CallError::Cancelled) => Err(IssuanceError::Cancelled {
                        stage: "certificate",
                    }),
                    Err(CallError::Authority(err)) => Err(IssuanceError::CertificateRetrieval {
                        message: err.to_string(),
                    }),
                }
            },
        )
        .await
    }
}
