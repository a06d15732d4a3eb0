use std::sync::Arc;
use std::time::Duration;

use dns01_issuer::domain::Domain;
use dns01_issuer::issuance::dns_providers::InMemoryDnsProvider;
use dns01_issuer::issuance::poll::Backoff;
use dns01_issuer::issuance::types::{AuthorizationStatus, ChallengeStatus};
use dns01_issuer::issuance::{
    CancelToken, CertificateAuthority, ChallengeExtractor, ChallengeValidator, ErrorKind,
    ExtractedChallenges, TxtRecordProvisioner,
};

use crate::support::{FakeAuthority, Script};

fn backoff(attempts: u32) -> Backoff {
    Backoff::new(Duration::from_millis(1), Duration::from_millis(2), attempts)
}

async fn extract(authority: &Arc<FakeAuthority>) -> ExtractedChallenges {
    ChallengeExtractor::new(authority.clone(), Duration::from_secs(5))
        .extract(&Domain::parse("example.com").unwrap(), &CancelToken::new())
        .await
        .unwrap()
}

async fn publish(dns: &Arc<InMemoryDnsProvider>, extracted: &ExtractedChallenges) {
    let contents: Vec<String> = extracted
        .challenges
        .iter()
        .map(|c| c.content.clone())
        .collect();
    let outcome = TxtRecordProvisioner::new(dns.clone(), 60)
        .create("zone-1", "example.com", &contents, &CancelToken::new())
        .await;
    assert!(outcome.success);
}

#[tokio::test]
async fn validates_every_authorization_after_publication() {
    let dns = Arc::new(InMemoryDnsProvider::new());
    let authority = Arc::new(
        FakeAuthority::new(Script {
            pending_refreshes: 2,
            ..Script::default()
        })
        .with_dns(dns.clone()),
    );
    let extracted = extract(&authority).await;
    publish(&dns, &extracted).await;

    let validated = ChallengeValidator::new(authority.clone(), backoff(10), Duration::from_secs(5))
        .validate(&extracted.authorizations, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(validated.len(), 2);
    assert!(validated.iter().all(|a| a.status == AuthorizationStatus::Valid));
    assert_eq!(authority.verify_calls(), 2);
    assert_eq!(authority.complete_calls(), 2);
}

#[tokio::test]
async fn revalidating_valid_authorizations_changes_nothing() {
    let dns = Arc::new(InMemoryDnsProvider::new());
    let authority = Arc::new(FakeAuthority::new(Script::default()).with_dns(dns.clone()));
    let extracted = extract(&authority).await;
    publish(&dns, &extracted).await;
    let validator = ChallengeValidator::new(authority.clone(), backoff(10), Duration::from_secs(5));

    let first = validator
        .validate(&extracted.authorizations, &CancelToken::new())
        .await
        .unwrap();
    let second = validator.validate(&first, &CancelToken::new()).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(authority.verify_calls(), 2);
    assert_eq!(authority.complete_calls(), 2);

    // Completing an already valid challenge again leaves it valid.
    let challenge = second[0].dns_challenge().unwrap().clone();
    let again = authority.complete_challenge(&challenge).await.unwrap();
    assert_eq!(again.status, ChallengeStatus::Valid);
    let refreshed = authority.refresh_authorization(&second[0]).await.unwrap();
    assert_eq!(refreshed.status, AuthorizationStatus::Valid);
}

#[tokio::test]
async fn unpublished_record_fails_verification_fast() {
    let dns = Arc::new(InMemoryDnsProvider::new());
    let authority = Arc::new(FakeAuthority::new(Script::default()).with_dns(dns));
    let extracted = extract(&authority).await;

    let err = ChallengeValidator::new(authority.clone(), backoff(10), Duration::from_secs(5))
        .validate(&extracted.authorizations, &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ChallengeVerificationFailed);
    assert_eq!(authority.verify_calls(), 1);
    assert_eq!(authority.complete_calls(), 0);
}

#[tokio::test]
async fn rejected_completion_aborts_remaining_authorizations() {
    let authority = Arc::new(FakeAuthority::new(Script {
        reject_complete: true,
        ..Script::default()
    }));
    let extracted = extract(&authority).await;

    let err = ChallengeValidator::new(authority.clone(), backoff(10), Duration::from_secs(5))
        .validate(&extracted.authorizations, &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ChallengeVerificationFailed);
    assert!(err.to_string().contains("complete"));
    assert_eq!(authority.complete_calls(), 1);
}

#[tokio::test]
async fn authorization_stuck_pending_exhausts_backoff() {
    let authority = Arc::new(FakeAuthority::new(Script {
        pending_refreshes: 100,
        ..Script::default()
    }));
    let extracted = extract(&authority).await;

    let err = ChallengeValidator::new(authority, backoff(3), Duration::from_secs(5))
        .validate(&extracted.authorizations, &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ChallengeVerificationFailed);
    assert!(err.to_string().contains("poll authorization"));
}
