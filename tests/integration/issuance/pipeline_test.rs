use std::path::Path;
use std::sync::Arc;

use dns01_issuer::distribution::FileStatus;
use dns01_issuer::issuance::dns_providers::InMemoryDnsProvider;
use dns01_issuer::issuance::{
    CancelToken, ErrorKind, IssuanceCoordinator, IssuanceState, TxtRecordProvisioner,
};
use dns01_issuer::storage::StorageLayout;

use crate::support::{FakeAuthority, Script, StallingDns, fast_settings};

struct Harness {
    dir: tempfile::TempDir,
    dns: Arc<InMemoryDnsProvider>,
    authority: Arc<FakeAuthority>,
    coordinator: IssuanceCoordinator,
}

fn harness(script: Script, dns: InMemoryDnsProvider) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let dns = Arc::new(dns);
    let authority = Arc::new(FakeAuthority::new(script).with_dns(dns.clone()));
    let coordinator = IssuanceCoordinator::new(
        authority.clone(),
        StorageLayout::new(dir.path()),
        fast_settings(),
    )
    .with_provisioner(TxtRecordProvisioner::new(dns.clone(), 60));
    Harness {
        dir,
        dns,
        authority,
        coordinator,
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

fn states(history: &[dns01_issuer::issuance::session::StateTransition]) -> Vec<IssuanceState> {
    history.iter().map(|transition| transition.state).collect()
}

#[tokio::test]
async fn issues_and_cleans_up_records() {
    let h = harness(
        Script {
            pending_refreshes: 1,
            processing_refreshes: 1,
            certificate_not_found: 1,
            ..Script::default()
        },
        InMemoryDnsProvider::new(),
    );

    let report = h.coordinator.issue("Example.COM", "zone-1").await;

    assert!(report.is_success(), "failure: {:?}", report.failure);
    assert_eq!(report.domain, "example.com");
    assert_eq!(
        states(&report.history),
        vec![
            IssuanceState::Created,
            IssuanceState::Ordered,
            IssuanceState::AuthorizationsFetched,
            IssuanceState::RecordsPublished,
            IssuanceState::Validated,
            IssuanceState::Finalized,
            IssuanceState::CertificateWritten,
        ]
    );

    let records = report.records.as_ref().unwrap();
    assert_eq!(records.record_ids.len(), 2);
    let cleanup = report.cleanup.as_ref().unwrap();
    assert!(cleanup.success);
    assert_eq!(cleanup.deleted, records.record_ids);
    assert!(h.dns.records().is_empty());

    let domain_dir = h.dir.path().join("example.com");
    let cert = read(&domain_dir.join("cert.pem"));
    let chain = read(&domain_dir.join("chain.pem"));
    let fullchain = read(&domain_dir.join("fullchain.pem"));
    assert_eq!(fullchain, format!("{cert}{chain}"));
    assert!(domain_dir.join("privkey.pem").exists());
    assert_eq!(report.files.len(), 3);
    assert!(report.files.iter().all(|f| f.status == FileStatus::Written));

    let summary = report.certificate.as_ref().unwrap();
    assert!(summary.sans.contains(&"example.com".to_string()));
    assert!(summary.sans.contains(&"*.example.com".to_string()));
    assert_eq!(report.key_reused, Some(false));
}

#[tokio::test]
async fn second_run_reuses_key_and_keeps_existing_files() {
    let h = harness(Script::default(), InMemoryDnsProvider::new());
    let first = h.coordinator.issue("example.com", "zone-1").await;
    assert!(first.is_success());
    let domain_dir = h.dir.path().join("example.com");
    let cert_before = std::fs::read(domain_dir.join("cert.pem")).unwrap();
    let key_before = std::fs::read(domain_dir.join("privkey.pem")).unwrap();

    let second = h.coordinator.issue("example.com", "zone-1").await;

    assert!(second.is_success(), "failure: {:?}", second.failure);
    assert_eq!(second.key_reused, Some(true));
    assert!(second.files.iter().all(|f| f.status == FileStatus::Skipped));
    assert_eq!(std::fs::read(domain_dir.join("cert.pem")).unwrap(), cert_before);
    assert_eq!(std::fs::read(domain_dir.join("privkey.pem")).unwrap(), key_before);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn two_phase_session_completes_once() {
    let h = harness(Script::default(), InMemoryDnsProvider::new());

    let pending = h.coordinator.begin("example.com").await.unwrap();
    assert_eq!(pending.challenges.len(), 2);
    assert_eq!(h.coordinator.sessions().len(), 1);

    let published = TxtRecordProvisioner::new(h.dns.clone(), 60)
        .create("zone-1", "example.com", &pending.contents(), &CancelToken::new())
        .await;
    assert!(published.success);

    let report = h.coordinator.complete(&pending.session_id).await;
    assert!(report.is_success(), "failure: {:?}", report.failure);
    assert_eq!(report.run_id, pending.session_id);
    assert!(report.cleanup.is_none());
    assert_eq!(h.dns.records().len(), 2);
    assert!(h.coordinator.sessions().is_empty());

    let again = h.coordinator.complete(&pending.session_id).await;
    assert!(!again.is_success());
    assert_eq!(again.failure.unwrap().kind, ErrorKind::SessionNotFound);
}

#[tokio::test]
async fn failed_completion_keeps_session_for_retry() {
    let h = harness(Script::default(), InMemoryDnsProvider::new());
    let pending = h.coordinator.begin("example.com").await.unwrap();

    let early = h.coordinator.complete(&pending.session_id).await;
    assert_eq!(
        early.failure.as_ref().unwrap().kind,
        ErrorKind::ChallengeVerificationFailed
    );
    assert_eq!(h.coordinator.sessions().len(), 1);

    TxtRecordProvisioner::new(h.dns.clone(), 60)
        .create("zone-1", "example.com", &pending.contents(), &CancelToken::new())
        .await;
    let report = h.coordinator.complete(&pending.session_id).await;

    assert!(report.is_success(), "failure: {:?}", report.failure);
    assert_eq!(report.run_id, pending.session_id);
    assert!(h.coordinator.sessions().is_empty());
}

#[tokio::test]
async fn saved_session_resumes_after_reload() {
    let h = harness(Script::default(), InMemoryDnsProvider::new());
    let layout = StorageLayout::new(h.dir.path());
    let pending = h.coordinator.begin("example.com").await.unwrap();
    pending.save(&layout).unwrap();
    TxtRecordProvisioner::new(h.dns.clone(), 60)
        .create("zone-1", "example.com", &pending.contents(), &CancelToken::new())
        .await;

    let restored = dns01_issuer::issuance::PendingIssuance::find(&layout, &pending.session_id)
        .unwrap()
        .expect("session file exists");
    let report = h.coordinator.resume(restored).await;

    assert!(report.is_success(), "failure: {:?}", report.failure);
    assert_eq!(report.challenges, pending.challenges);
}

#[tokio::test]
async fn provisioning_failure_removes_partial_records() {
    let h = harness(Script::default(), InMemoryDnsProvider::new().fail_create_on(2));

    let report = h.coordinator.issue("example.com", "zone-1").await;

    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::RecordProvisioningFailed);
    assert_eq!(failure.state, IssuanceState::AuthorizationsFetched);
    assert_eq!(report.state, IssuanceState::Failed);
    assert_eq!(report.records.as_ref().unwrap().record_ids.len(), 1);
    assert!(report.cleanup.as_ref().unwrap().success);
    assert!(h.dns.records().is_empty());
    assert_eq!(h.authority.verify_calls(), 0);
}

#[tokio::test]
async fn validation_failure_still_cleans_up() {
    let h = harness(
        Script {
            reject_complete: true,
            ..Script::default()
        },
        InMemoryDnsProvider::new(),
    );

    let report = h.coordinator.issue("example.com", "zone-1").await;

    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::ChallengeVerificationFailed);
    assert_eq!(failure.state, IssuanceState::RecordsPublished);
    assert_eq!(report.cleanup.as_ref().unwrap().deleted.len(), 2);
    assert!(h.dns.records().is_empty());
    assert!(!h.dir.path().join("example.com/cert.pem").exists());
    assert_eq!(h.authority.finalize_calls(), 0);
}

#[tokio::test]
async fn cancelled_run_reports_cancellation() {
    let h = harness(Script::default(), InMemoryDnsProvider::new());
    let cancel = CancelToken::new();
    cancel.cancel();
    let coordinator = h.coordinator.with_cancel_token(cancel);

    let report = coordinator.issue("example.com", "zone-1").await;

    assert_eq!(report.failure.unwrap().kind, ErrorKind::Cancelled);
    assert!(report.records.is_none());
    assert_eq!(h.authority.created_orders(), 0);
}

#[tokio::test]
async fn invalid_domain_is_rejected_before_ordering() {
    let h = harness(Script::default(), InMemoryDnsProvider::new());

    let report = h.coordinator.issue("not a domain", "zone-1").await;

    let failure = report.failure.unwrap();
    assert_eq!(failure.kind, ErrorKind::InvalidDomain);
    assert_eq!(failure.state, IssuanceState::Created);
    assert_eq!(h.authority.created_orders(), 0);
}

#[tokio::test]
async fn cancellation_during_provisioning_stops_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let dns = Arc::new(InMemoryDnsProvider::new());
    let authority = Arc::new(FakeAuthority::new(Script::default()).with_dns(dns.clone()));
    let cancel = CancelToken::new();
    let stalling = StallingDns::new(dns.clone(), cancel.clone(), 2);
    let coordinator = IssuanceCoordinator::new(
        authority.clone(),
        StorageLayout::new(dir.path()),
        fast_settings(),
    )
    .with_provisioner(TxtRecordProvisioner::new(Arc::new(stalling), 60))
    .with_cancel_token(cancel);

    let report = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        coordinator.issue("example.com", "zone-1"),
    )
    .await
    .expect("cancellation interrupts the stalled provider call");

    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.kind, ErrorKind::Cancelled);
    assert_eq!(failure.state, IssuanceState::AuthorizationsFetched);
    assert_eq!(report.records.as_ref().unwrap().record_ids.len(), 1);
    assert!(report.cleanup.as_ref().unwrap().success);
    assert!(dns.records().is_empty());
    assert_eq!(authority.verify_calls(), 0);
}

#[tokio::test]
async fn coordinators_sharing_storage_take_turns() {
    let dir = tempfile::tempdir().unwrap();
    let dns = Arc::new(InMemoryDnsProvider::new());
    let authority = Arc::new(FakeAuthority::new(Script::default()).with_dns(dns.clone()));
    let coordinator = || {
        IssuanceCoordinator::new(
            authority.clone(),
            StorageLayout::new(dir.path()),
            fast_settings(),
        )
        .with_provisioner(TxtRecordProvisioner::new(dns.clone(), 60))
    };
    let (a, b) = (coordinator(), coordinator());

    let (first, second) = tokio::join!(
        a.issue("example.com", "zone-1"),
        b.issue("example.com", "zone-1")
    );

    assert!(first.is_success(), "failure: {:?}", first.failure);
    assert!(second.is_success(), "failure: {:?}", second.failure);
    let mut reuse = vec![first.key_reused, second.key_reused];
    reuse.sort();
    assert_eq!(reuse, vec![Some(false), Some(true)]);

    let (earlier, later) = if first.finished_at <= second.finished_at {
        (&first, &second)
    } else {
        (&second, &first)
    };
    let later_ordered = later
        .history
        .iter()
        .find(|transition| transition.state == IssuanceState::Ordered)
        .unwrap()
        .at;
    assert!(earlier.finished_at <= later_ordered);
    assert!(dir.path().join("example.com/.lock").exists());
    assert!(dns.records().is_empty());
}
