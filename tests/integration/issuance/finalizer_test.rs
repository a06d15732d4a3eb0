use std::sync::Arc;
use std::time::Duration;

use dns01_issuer::config::EngineSettings;
use dns01_issuer::domain::Domain;
use dns01_issuer::issuance::types::{Order, OrderStatus};
use dns01_issuer::issuance::{
    CancelToken, CertificateAuthority, ErrorKind, IssuanceError, OrderFinalizer,
};
use dns01_issuer::storage::StorageLayout;

use crate::support::{FakeAuthority, Script, fast_settings};

async fn ready_order(authority: &FakeAuthority) -> Order {
    let order = authority
        .create_order(&["example.com".to_string(), "*.example.com".to_string()])
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Ready);
    order
}

fn preauthorized(script: Script) -> Arc<FakeAuthority> {
    Arc::new(FakeAuthority::new(Script {
        preauthorized: true,
        ..script
    }))
}

fn finalizer(
    authority: Arc<FakeAuthority>,
    root: &std::path::Path,
    settings: EngineSettings,
) -> OrderFinalizer {
    OrderFinalizer::new(authority, StorageLayout::new(root), settings)
}

#[tokio::test]
async fn retries_certificate_download_until_available() {
    let dir = tempfile::tempdir().unwrap();
    let authority = preauthorized(Script {
        certificate_not_found: 2,
        processing_refreshes: 2,
        ..Script::default()
    });
    let order = ready_order(&authority).await;
    let domain = Domain::parse("example.com").unwrap();

    let finalized = finalizer(authority.clone(), dir.path(), fast_settings())
        .finalize(&order, &domain, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(finalized.order.status, OrderStatus::Valid);
    assert_eq!(finalized.chain_pem, authority.chain());
    assert!(!finalized.key_reused);
    assert_eq!(authority.finalize_calls(), 1);
    assert_eq!(authority.certificate_calls(), 3);
}

#[tokio::test]
async fn gives_up_when_certificate_never_appears() {
    let dir = tempfile::tempdir().unwrap();
    let authority = preauthorized(Script {
        certificate_not_found: 100,
        ..Script::default()
    });
    let order = ready_order(&authority).await;
    let domain = Domain::parse("example.com").unwrap();

    let err = finalizer(authority.clone(), dir.path(), fast_settings())
        .finalize(&order, &domain, &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CertificateUnavailable);
    assert!(matches!(
        err,
        IssuanceError::CertificateUnavailable { attempts: 5 }
    ));
    assert_eq!(authority.certificate_calls(), 5);
}

#[tokio::test]
async fn order_stuck_processing_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let authority = preauthorized(Script {
        processing_refreshes: u32::MAX,
        ..Script::default()
    });
    let order = ready_order(&authority).await;
    let domain = Domain::parse("example.com").unwrap();
    let settings = EngineSettings {
        order_max_wait: Duration::from_millis(20),
        ..fast_settings()
    };

    let err = finalizer(authority.clone(), dir.path(), settings)
        .finalize(&order, &domain, &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OrderTimedOut);
    match err {
        IssuanceError::OrderTimedOut { last_status, .. } => {
            assert_eq!(last_status, OrderStatus::Processing)
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(authority.certificate_calls(), 0);
}

#[tokio::test]
async fn pending_order_is_not_finalized() {
    let dir = tempfile::tempdir().unwrap();
    let authority = Arc::new(FakeAuthority::new(Script::default()));
    let order = authority
        .create_order(&["example.com".to_string()])
        .await
        .unwrap();
    let domain = Domain::parse("example.com").unwrap();

    let err = finalizer(authority.clone(), dir.path(), fast_settings())
        .finalize(&order, &domain, &CancelToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::OrderTimedOut);
    assert_eq!(authority.finalize_calls(), 0);
}

#[tokio::test]
async fn second_finalization_reuses_stored_key() {
    let dir = tempfile::tempdir().unwrap();
    let authority = preauthorized(Script::default());
    let domain = Domain::parse("example.com").unwrap();
    let finalizer = finalizer(authority.clone(), dir.path(), fast_settings());

    let first_order = ready_order(&authority).await;
    let first = finalizer
        .finalize(&first_order, &domain, &CancelToken::new())
        .await
        .unwrap();
    let key_before = std::fs::read(dir.path().join("example.com/privkey.pem")).unwrap();

    // The already valid order skips CSR submission and downloads again.
    let second = finalizer
        .finalize(&first.order, &domain, &CancelToken::new())
        .await
        .unwrap();
    let key_after = std::fs::read(dir.path().join("example.com/privkey.pem")).unwrap();

    assert!(!first.key_reused);
    assert!(second.key_reused);
    assert_eq!(key_before, key_after);
    assert_eq!(authority.finalize_calls(), 1);
    assert_eq!(authority.certificate_calls(), 2);
}

#[tokio::test]
async fn cancelled_finalization_stops_before_submission() {
    let dir = tempfile::tempdir().unwrap();
    let authority = preauthorized(Script::default());
    let order = ready_order(&authority).await;
    let domain = Domain::parse("example.com").unwrap();
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = finalizer(authority.clone(), dir.path(), fast_settings())
        .finalize(&order, &domain, &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(authority.finalize_calls(), 0);
}
