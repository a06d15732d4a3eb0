use std::sync::Arc;

use anyhow::{Result, anyhow};

use dns01_issuer::domain::record_name;
use dns01_issuer::issuance::{CancelToken, TxtRecordProvisioner};
use dns01_issuer::issuance::dns_providers::DnsProvider;

use super::test_utils::{
    expected_txt_content, list_txt_records, load_cloudflare_config, provider, purge_txt_records,
    test_domain, wait_for_record_content, zone_id,
};

#[tokio::test]
async fn cloudflare_token_is_active() -> Result<()> {
    let config = load_cloudflare_config()?;
    let info = provider(&config).verify_token().await?;
    if info.status != "active" {
        return Err(anyhow!("Expected active token, got {}", info.status));
    }
    Ok(())
}

#[tokio::test]
async fn cloudflare_txt_value_is_quoted() -> Result<()> {
    let config = load_cloudflare_config()?;
    let zone_id = zone_id(&config).await?;
    let name = record_name(&test_domain(&config.zone, "txt"));
    purge_txt_records(&config, &zone_id, &name).await?;

    let provider = provider(&config);
    let value = "integration-test-txt";
    let record_id = provider
        .create_txt_record(&zone_id, &name, value, 60)
        .await?;

    let expected = expected_txt_content(value);
    let listed = wait_for_record_content(&config, &zone_id, &name, &expected).await;
    let fetched = provider.get_txt_record(&zone_id, &record_id).await;
    provider.delete_txt_record(&zone_id, &record_id).await?;

    let listed = listed?;
    if listed.id != record_id || listed.name != name {
        return Err(anyhow!(
            "Expected record {} at {}, got {} at {}",
            record_id,
            name,
            listed.id,
            listed.name
        ));
    }
    let fetched = fetched?.ok_or_else(|| anyhow!("Created record could not be fetched"))?;
    if fetched.content != value {
        return Err(anyhow!(
            "Expected unquoted content {}, got {}",
            value,
            fetched.content
        ));
    }
    Ok(())
}

#[tokio::test]
async fn cloudflare_duplicate_create_reuses_record() -> Result<()> {
    let config = load_cloudflare_config()?;
    let zone_id = zone_id(&config).await?;
    let name = record_name(&test_domain(&config.zone, "duplicate"));
    purge_txt_records(&config, &zone_id, &name).await?;

    let provider = provider(&config);
    let first = provider
        .create_txt_record(&zone_id, &name, "integration-test-duplicate", 60)
        .await?;
    let second = provider
        .create_txt_record(&zone_id, &name, "integration-test-duplicate", 60)
        .await;
    provider.delete_txt_record(&zone_id, &first).await?;

    let second = second?;
    if first != second {
        return Err(anyhow!("Expected reused id {}, got {}", first, second));
    }
    Ok(())
}

#[tokio::test]
async fn cloudflare_provisioner_round_trip() -> Result<()> {
    let config = load_cloudflare_config()?;
    let zone_id = zone_id(&config).await?;
    let domain = test_domain(&config.zone, "pair");
    let name = record_name(&domain);
    purge_txt_records(&config, &zone_id, &name).await?;

    let provisioner = TxtRecordProvisioner::new(Arc::new(provider(&config)), 60);
    let contents = vec![
        "integration-test-base".to_string(),
        "integration-test-wildcard".to_string(),
    ];
    let cancel = CancelToken::new();
    let created = provisioner
        .create(&zone_id, &domain, &contents, &cancel)
        .await;
    let deleted = provisioner
        .delete(&zone_id, &created.record_ids, &cancel)
        .await;

    if !created.success || created.record_ids.len() != 2 {
        return Err(anyhow!("Provisioning failed: {:?}", created.error));
    }
    if !deleted.success {
        return Err(anyhow!("Cleanup failed: {:?}", deleted.error));
    }
    let remaining = list_txt_records(&config, &zone_id, &name).await?;
    if !remaining.is_empty() {
        return Err(anyhow!("{} record(s) left behind", remaining.len()));
    }
    Ok(())
}

#[tokio::test]
async fn cloudflare_delete_is_idempotent() -> Result<()> {
    let config = load_cloudflare_config()?;
    let zone_id = zone_id(&config).await?;
    let name = record_name(&test_domain(&config.zone, "delete"));
    purge_txt_records(&config, &zone_id, &name).await?;

    let provider = provider(&config);
    let record_id = provider
        .create_txt_record(&zone_id, &name, "integration-test-delete", 60)
        .await?;
    provider.delete_txt_record(&zone_id, &record_id).await?;
    provider.delete_txt_record(&zone_id, &record_id).await?;

    if provider.get_txt_record(&zone_id, &record_id).await?.is_some() {
        return Err(anyhow!("Record {} still exists", record_id));
    }
    Ok(())
}
