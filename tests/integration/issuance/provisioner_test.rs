use std::sync::Arc;

use dns01_issuer::issuance::{CancelToken, TxtRecordProvisioner};
use dns01_issuer::issuance::dns_providers::{DnsProvider, InMemoryDnsProvider};

fn contents(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("content-{i}")).collect()
}

#[tokio::test]
async fn create_returns_one_id_per_content_in_input_order() {
    for n in 0..6 {
        let provider = Arc::new(InMemoryDnsProvider::new());
        let provisioner = TxtRecordProvisioner::new(provider.clone(), 60);
        let values = contents(n);

        let outcome = provisioner
            .create("zone-1", "example.com", &values, &CancelToken::new())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.record_ids.len(), n);
        assert_eq!(provider.records().len(), n);
        for (id, expected) in outcome.record_ids.iter().zip(&values) {
            let record = provider
                .get_txt_record("zone-1", id)
                .await
                .unwrap()
                .expect("created record exists");
            assert_eq!(&record.content, expected);
            assert_eq!(record.name, "_acme-challenge.example.com");
        }
    }
}

#[tokio::test]
async fn delete_of_created_records_leaves_nothing_behind() {
    let provider = Arc::new(InMemoryDnsProvider::new());
    let provisioner = TxtRecordProvisioner::new(provider.clone(), 60);
    let created = provisioner
        .create("zone-1", "example.com", &contents(3), &CancelToken::new())
        .await;

    let deleted = provisioner
        .delete("zone-1", &created.record_ids, &CancelToken::new())
        .await;

    assert!(deleted.success);
    assert_eq!(deleted.deleted, created.record_ids);
    for id in &created.record_ids {
        assert!(provider.get_txt_record("zone-1", id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn failure_on_second_of_three_reports_the_created_record() {
    let provider = Arc::new(InMemoryDnsProvider::new().fail_create_on(2));
    let provisioner = TxtRecordProvisioner::new(provider.clone(), 60);

    let outcome = provisioner
        .create("zone-1", "example.com", &contents(3), &CancelToken::new())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.record_ids.len(), 1);
    assert!(outcome.error.is_some());
    assert_eq!(provider.create_calls(), 2);

    let cleanup = provisioner
        .delete("zone-1", &outcome.record_ids, &CancelToken::new())
        .await;
    assert!(cleanup.success);
    assert!(provider.records().is_empty());
}
