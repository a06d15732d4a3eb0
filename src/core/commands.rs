use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use log::info;
use reqwest::Client;

use crate::config::IssuerConfig;
use crate::core::types::{CommandOutcome, RequestResponse, ZoneIdResponse};
use crate::domain::Domain;
use crate::issuance::dns::lookup_txt;
use crate::issuance::dns_providers::http::build_client;
use crate::issuance::dns_providers::{CloudflareProvider, DnsProvider, DnsProviderError, find_zone_id};
use crate::issuance::session::SessionFileError;
use crate::issuance::{
    AccountError, AcmeAccount, AcmeAuthority, CancelToken, IssuanceCoordinator, IssuanceError,
    PendingIssuance, TxtRecordProvisioner,
};
use crate::storage::StorageLayout;

/// Everything a command needs, built once from the loaded configuration.
pub struct CommandContext {
    pub config: IssuerConfig,
    pub layout: StorageLayout,
    pub client: Client,
    pub cancel: CancelToken,
}

impl CommandContext {
    pub fn new(config: IssuerConfig) -> Self {
        let layout = StorageLayout::new(config.storage_dir.clone());
        let client = build_client(config.http_timeout());
        Self {
            config,
            layout,
            client,
            cancel: CancelToken::new(),
        }
    }

    fn dns_provider(&self) -> Result<Arc<dyn DnsProvider>> {
        let token = self
            .config
            .cloudflare_api_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| anyhow!("CLOUDFLARE_API_TOKEN is not set"))?;
        Ok(Arc::new(CloudflareProvider::with_base_url(
            token,
            self.config.cloudflare_api_base.clone(),
            self.config.http_timeout(),
        )))
    }

    async fn authority(&self) -> Result<Arc<AcmeAuthority>> {
        let account = AcmeAccount::load(&self.layout)
            .await
            .context("failed to load ACME account")?;
        Ok(Arc::new(AcmeAuthority::new(
            account,
            self.client.clone(),
            self.config.doh_resolvers.clone(),
        )))
    }

    async fn coordinator(&self) -> Result<IssuanceCoordinator> {
        Ok(IssuanceCoordinator::new(
            self.authority().await?,
            self.layout.clone(),
            self.config.engine_settings(),
        )
        .with_propagation_check(self.client.clone(), self.config.doh_resolvers.clone())
        .with_cancel_token(self.cancel.clone()))
    }
}

/// Resolves the Cloudflare zone hosting `domain`.
pub async fn zone_id(ctx: &CommandContext, domain: &str) -> Result<CommandOutcome> {
    let domain = Domain::parse(domain)?;
    let provider = ctx.dns_provider()?;
    let zone = find_zone_id(provider.as_ref(), domain.as_str())
        .await
        .with_context(|| format!("failed to resolve zone for {domain}"))?;
    Ok(CommandOutcome::ok(
        "zone-id",
        ZoneIdResponse {
            domain: domain.to_string(),
            zone_id: zone.id,
            zone_name: zone.name,
        },
    ))
}

/// Registers the ACME account and stores its credentials.
pub async fn create_account(ctx: &CommandContext, force: bool) -> Result<CommandOutcome> {
    let (_, summary) = AcmeAccount::create(
        &ctx.config.directory_url,
        ctx.config.contact_email.as_deref(),
        &ctx.layout,
        force,
    )
    .await?;
    Ok(CommandOutcome::ok("account create", summary))
}

/// Orders a certificate and saves the pending session for `authorize`.
pub async fn request_certificate(ctx: &CommandContext, domain: &str) -> Result<CommandOutcome> {
    let coordinator = ctx.coordinator().await?;
    let pending = coordinator.begin(domain).await?;
    let session_file = pending
        .save(&ctx.layout)
        .context("failed to persist issuance session")?;
    info!(
        "[issuance] session {} saved to {}",
        pending.session_id,
        session_file.display()
    );
    Ok(CommandOutcome::ok(
        "request",
        RequestResponse {
            session_id: pending.session_id.clone(),
            domain: pending.domain.to_string(),
            display_domain: pending.domain.display_name(),
            order_url: pending.order.id.clone(),
            record_name: pending.domain.record_name(),
            challenges: pending.challenges,
            session_file,
        },
    ))
}

pub async fn add_txt_records(
    ctx: &CommandContext,
    zone_id: &str,
    domain: &str,
    contents: &[String],
) -> Result<CommandOutcome> {
    let domain = Domain::parse(domain)?;
    let provisioner = TxtRecordProvisioner::new(ctx.dns_provider()?, ctx.config.record_ttl);
    let outcome = provisioner
        .create(zone_id, domain.as_str(), contents, &ctx.cancel)
        .await;
    if outcome.success {
        return Ok(CommandOutcome::ok("txt add", outcome));
    }
    let message = outcome
        .error
        .clone()
        .unwrap_or_else(|| "TXT record creation failed".to_string());
    Ok(CommandOutcome::error(
        "txt add",
        "record_provisioning_failed",
        message,
        serde_json::to_value(&outcome).ok(),
    ))
}

/// Reports what public resolvers currently serve for the challenge record.
pub async fn dns_check(ctx: &CommandContext, domain: &str) -> Result<CommandOutcome> {
    let domain = Domain::parse(domain)?;
    let lookup = lookup_txt(&ctx.client, &ctx.config.doh_resolvers, &domain.record_name()).await;
    Ok(CommandOutcome::ok("dns-check", lookup))
}

/// Validates, finalizes and stores the certificate of a saved session.
pub async fn authorize(ctx: &CommandContext, session_id: &str) -> Result<CommandOutcome> {
    let pending = PendingIssuance::find(&ctx.layout, session_id)
        .context("failed to read saved sessions")?
        .ok_or_else(|| IssuanceError::SessionNotFound(session_id.to_string()))?;
    let domain = pending.domain.clone();

    let coordinator = ctx.coordinator().await?;
    let report = coordinator.resume(pending).await;
    if report.is_success() {
        PendingIssuance::discard(&ctx.layout, &domain)
            .context("failed to remove completed session")?;
        return Ok(CommandOutcome::ok("authorize", report));
    }
    Ok(report_failure("authorize", &report))
}

pub async fn delete_txt_records(
    ctx: &CommandContext,
    zone_id: &str,
    record_ids: &[String],
) -> Result<CommandOutcome> {
    let provisioner = TxtRecordProvisioner::new(ctx.dns_provider()?, ctx.config.record_ttl);
    let outcome = provisioner.delete(zone_id, record_ids, &ctx.cancel).await;
    if outcome.success {
        return Ok(CommandOutcome::ok("txt delete", outcome));
    }
    let message = outcome
        .error
        .clone()
        .unwrap_or_else(|| "TXT record deletion failed".to_string());
    Ok(CommandOutcome::error(
        "txt delete",
        "record_provisioning_failed",
        message,
        serde_json::to_value(&outcome).ok(),
    ))
}

pub async fn token_info(ctx: &CommandContext) -> Result<CommandOutcome> {
    let provider = ctx.dns_provider()?;
    let info = provider
        .verify_token()
        .await
        .context("failed to verify Cloudflare token")?;
    Ok(CommandOutcome::ok("token-info", info))
}

/// One-shot issuance: publishes the records, issues and cleans up.
pub async fn issue(ctx: &CommandContext, domain: &str, zone_id: Option<&str>) -> Result<CommandOutcome> {
    let provider = ctx.dns_provider()?;
    let zone_id = match zone_id {
        Some(zone_id) => zone_id.to_string(),
        None => {
            let parsed = Domain::parse(domain)?;
            find_zone_id(provider.as_ref(), parsed.as_str())
                .await
                .with_context(|| format!("failed to resolve zone for {parsed}"))?
                .id
        }
    };

    let coordinator = ctx
        .coordinator()
        .await?
        .with_provisioner(TxtRecordProvisioner::new(provider, ctx.config.record_ttl));
    let report = coordinator.issue(domain, &zone_id).await;
    if report.is_success() {
        return Ok(CommandOutcome::ok("issue", report));
    }
    Ok(report_failure("issue", &report))
}

fn report_failure(command: &str, report: &crate::issuance::IssuanceReport) -> CommandOutcome {
    let (kind, message) = match &report.failure {
        Some(failure) => (
            serde_json::to_value(failure.kind)
                .ok()
                .and_then(|value| value.as_str().map(str::to_string))
                .unwrap_or_else(|| "issuance".to_string()),
            failure.message.clone(),
        ),
        None => ("issuance".to_string(), "issuance did not complete".to_string()),
    };
    CommandOutcome::error(command, kind, message, serde_json::to_value(report).ok())
}

/// Maps an error to the stable `kind` string printed with it.
pub fn error_kind(err: &anyhow::Error) -> String {
    if let Some(issuance) = err.downcast_ref::<IssuanceError>() {
        return serde_json::to_value(issuance.kind())
            .ok()
            .and_then(|value| value.as_str().map(str::to_string))
            .unwrap_or_else(|| "issuance".to_string());
    }
    if err.downcast_ref::<crate::domain::DomainError>().is_some() {
        return "invalid_domain".to_string();
    }
    if err.downcast_ref::<DnsProviderError>().is_some() {
        return "dns_provider".to_string();
    }
    if err.downcast_ref::<AccountError>().is_some() {
        return "account".to_string();
    }
    if err.downcast_ref::<SessionFileError>().is_some() {
        return "persistence_error".to_string();
    }
    if err.downcast_ref::<crate::config::ConfigError>().is_some() {
        return "config".to_string();
    }
    "internal".to_string()
}
