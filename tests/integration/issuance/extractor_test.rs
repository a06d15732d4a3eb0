use std::sync::Arc;
use std::time::Duration;

use dns01_issuer::domain::Domain;
use dns01_issuer::issuance::types::AuthorizationStatus;
use dns01_issuer::issuance::{CancelToken, ChallengeExtractor, ErrorKind, IssuanceError};

use crate::support::{FakeAuthority, Script};

fn extractor(authority: Arc<FakeAuthority>) -> ChallengeExtractor {
    ChallengeExtractor::new(authority, Duration::from_secs(5))
}

#[tokio::test]
async fn orders_base_and_wildcard_together() {
    let authority = Arc::new(FakeAuthority::new(Script::default()));
    let domain = Domain::parse("example.com").unwrap();

    let extracted = extractor(authority.clone())
        .extract(&domain, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(
        authority.order_identifiers(&extracted.order.id),
        vec!["example.com", "*.example.com"]
    );
    assert_eq!(extracted.authorizations.len(), 2);
    assert_eq!(extracted.challenges.len(), 2);
    assert!(
        extracted
            .challenges
            .iter()
            .all(|c| c.record_name == "_acme-challenge.example.com")
    );
}

#[tokio::test]
async fn contents_stay_aligned_when_later_values_finish_first() {
    let authority = Arc::new(FakeAuthority::new(Script {
        reverse_key_delays: true,
        ..Script::default()
    }));
    let domain = Domain::parse("example.com").unwrap();

    let extracted = extractor(authority)
        .extract(&domain, &CancelToken::new())
        .await
        .unwrap();

    for (authz, published) in extracted.authorizations.iter().zip(&extracted.challenges) {
        let token = &authz.dns_challenge().unwrap().token;
        assert_eq!(published.content, format!("txt-{token}"));
        assert_eq!(published.identifier, authz.display_identifier());
    }
}

#[tokio::test]
async fn valid_authorizations_are_deactivated_and_order_recreated() {
    let authority = Arc::new(FakeAuthority::new(Script {
        preauthorized: true,
        ..Script::default()
    }));
    let domain = Domain::parse("example.com").unwrap();

    let extracted = extractor(authority.clone())
        .extract(&domain, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(authority.deactivated().len(), 2);
    assert_eq!(authority.created_orders(), 2);
    assert!(
        extracted
            .authorizations
            .iter()
            .all(|a| a.status == AuthorizationStatus::Pending)
    );
}

#[tokio::test]
async fn missing_dns_challenge_fails_with_identifier() {
    let authority = Arc::new(FakeAuthority::new(Script {
        no_dns_challenge_for: vec!["*.example.com".into()],
        ..Script::default()
    }));
    let domain = Domain::parse("example.com").unwrap();

    let err = extractor(authority)
        .extract(&domain, &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ChallengeNotFound);
    match err {
        IssuanceError::ChallengeNotFound { identifier } => assert_eq!(identifier, "*.example.com"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cancelled_before_ordering() {
    let authority = Arc::new(FakeAuthority::new(Script::default()));
    let domain = Domain::parse("example.com").unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = extractor(authority.clone())
        .extract(&domain, &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(authority.created_orders(), 0);
}
