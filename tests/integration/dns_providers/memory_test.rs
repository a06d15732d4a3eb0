use std::sync::Arc;

use dns01_issuer::issuance::{CancelToken, TxtRecordProvisioner};
use dns01_issuer::issuance::dns_providers::{
    DnsProvider, DnsProviderError, InMemoryDnsProvider, Zone, find_zone_id,
};

fn zones() -> Vec<Zone> {
    vec![
        Zone {
            id: "zone-root".into(),
            name: "example.com".into(),
        },
        Zone {
            id: "zone-dev".into(),
            name: "dev.example.com".into(),
        },
    ]
}

#[tokio::test]
async fn resolves_nested_subdomain_to_most_specific_zone() {
    let provider = InMemoryDnsProvider::with_zones(zones());
    let zone = find_zone_id(&provider, "api.dev.example.com").await.unwrap();
    assert_eq!(zone.id, "zone-dev");
    let zone = find_zone_id(&provider, "www.example.com").await.unwrap();
    assert_eq!(zone.id, "zone-root");
}

#[tokio::test]
async fn unknown_zone_is_reported_by_provisioner() {
    let provider = Arc::new(InMemoryDnsProvider::with_zones(zones()));
    let provisioner = TxtRecordProvisioner::new(provider.clone(), 60);

    let outcome = provisioner
        .create(
            "zone-missing",
            "example.com",
            &["value".to_string()],
            &CancelToken::new(),
        )
        .await;

    assert!(!outcome.success);
    assert!(outcome.record_ids.is_empty());
    assert_eq!(
        outcome.error,
        Some(DnsProviderError::ZoneNotFound("zone-missing".into()).to_string())
    );
}

#[tokio::test]
async fn token_check_reports_active() {
    let provider = InMemoryDnsProvider::new();
    assert_eq!(provider.verify_token().await.unwrap().status, "active");
}
