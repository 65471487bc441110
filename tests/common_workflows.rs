//! Integration tests for common Beacon workflows.
//!
//! These tests verify that the most common use cases work correctly.

use beacon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// =============================================================================
// Test Mode Tests
// =============================================================================

#[tokio::test]
async fn test_test_mode_fixtures() {
    let service = connect(&DiscoveryConfig::new("-")).await.unwrap();

    assert_eq!(service.domain(), "sd");
    assert_eq!(service.datacenter(), "dev");
    assert_eq!(service.node_name(), "node01");

    let test1 = service.resolve_all("test1").await.unwrap();
    assert_eq!(test1.to_strings(), vec!["127.0.0.1:12345", "127.0.0.1:12348"]);

    let syslog = service.resolve_one("syslog").await.unwrap();
    assert_eq!(syslog, Endpoint::new("127.0.0.1", 9514));

    assert_eq!(
        service.connection_string("mongo").await.unwrap(),
        "127.0.0.1:27017,192.168.10.123:27017"
    );

    service.shutdown().await;
}

#[tokio::test]
async fn test_fully_qualified_names() {
    let service = ResolutionService::test_mode().await;

    let bare = service.resolve_all("test3").await.unwrap();
    let qualified = service.resolve_all("test3.service.sd").await.unwrap();
    assert_eq!(bare, qualified);
    assert_eq!(service.watched_keys().len(), 1);

    service.shutdown().await;
}

#[test]
fn test_unknown_service() {
    tokio_test::block_on(async {
        let service = ResolutionService::test_mode().await;

        let err = service.resolve_all("nope").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::NotFound { .. }));
        assert!(service.cached("nope").is_none());
    });
}

// =============================================================================
// Subscription Tests
// =============================================================================

#[tokio::test]
async fn test_subscribe_and_unsubscribe() {
    let service = ResolutionService::test_mode().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let id: SubscriptionId = service.subscribe("test2", move |set: &EndpointSet| {
        assert_eq!(set.len(), 1);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    service.resolve_all("test2").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Served from cache, nothing changed
    service.resolve_all("test2").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert!(service.unsubscribe("test2", id));
    service.shutdown().await;
}

// =============================================================================
// URL Rewriting Tests
// =============================================================================

#[tokio::test]
async fn test_rewrite_url() {
    let service = ResolutionService::test_mode().await;

    assert_eq!(
        service.rewrite_url("udp://syslog/local0").await,
        "udp://127.0.0.1:9514/local0"
    );
    assert_eq!(
        service.rewrite_url("http://test2.service.sd/health?full=1").await,
        "http://10.11.12.13:1415/health?full=1"
    );
    assert_eq!(
        service.rewrite_url("http://localhost:9999/").await,
        "http://localhost:9999/"
    );
    assert_eq!(
        service.rewrite_url("https://example.com/").await,
        "https://example.com/"
    );

    service.shutdown().await;
}

// =============================================================================
// Logging Tests
// =============================================================================

#[cfg(feature = "log")]
#[tokio::test]
async fn test_logging_with_resolution() {
    beacon::beacon_log::init();
    beacon::beacon_log::init();

    let service = ResolutionService::test_mode().await;
    tracing::info!(domain = service.domain(), "test mode ready");
    service.resolve_all("statsd").await.unwrap();
    service.shutdown().await;
}
