//! Key store integration tests against a real HTTP key set endpoint.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use auth_gate::auth::{HttpKeySetSource, KeyStore, TokenVerifier};
use auth_gate::errors::KeyStoreError;
use gate_test_utils::{
    jwks_document, MockJwksServer, TestTokenBuilder, JWKS_PATH, PRIMARY_KEY, SECONDARY_KEY,
    TEST_AUDIENCE, TEST_ISSUER,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_store(url: &str, timeout: Duration) -> KeyStore {
    KeyStore::new(Arc::new(HttpKeySetSource::new(url.to_string(), timeout)))
}

async fn delayed_server(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(JWKS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(jwks_document(&[&PRIMARY_KEY]))
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_rsa_key_from_published_components_verifies_tokens() {
    let jwks = MockJwksServer::start().await;
    jwks.serve_keys(&[&PRIMARY_KEY, &SECONDARY_KEY]).await;

    let store = Arc::new(http_store(&jwks.url(), Duration::from_secs(2)));
    let verifier = TokenVerifier::new(
        store.clone(),
        TEST_AUDIENCE.to_string(),
        TEST_ISSUER.to_string(),
    );

    for key in [&PRIMARY_KEY, &SECONDARY_KEY] {
        let token = TestTokenBuilder::new()
            .for_subject(key.kid)
            .sign_rs256(key);
        let identity = verifier.verify_token(&token).await.unwrap();
        assert_eq!(identity.subject(), key.kid);
    }

    assert_eq!(store.key_count().await, 2);
    assert_eq!(jwks.fetch_count().await, 1);
}

#[tokio::test]
async fn test_error_status_is_fetch_error() {
    let jwks = MockJwksServer::start().await;
    jwks.serve_status(500).await;
    let store = http_store(&jwks.url(), Duration::from_secs(2));

    let result = store.resolve_key(Some(PRIMARY_KEY.kid), "RS256").await;
    assert!(matches!(result, Err(KeyStoreError::Fetch(_))));
}

#[tokio::test]
async fn test_unparseable_body_is_document_error() {
    let jwks = MockJwksServer::start().await;
    jwks.serve_malformed().await;
    let store = http_store(&jwks.url(), Duration::from_secs(2));

    let result = store.refresh().await;
    assert!(matches!(result, Err(KeyStoreError::Document(_))));
    assert_eq!(store.key_count().await, 0);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_fetch_error() {
    // Nothing listens on the discard port
    let store = http_store("http://127.0.0.1:9/jwks.json", Duration::from_secs(2));

    let result = store.refresh().await;
    assert!(matches!(result, Err(KeyStoreError::Fetch(_))));
}

#[tokio::test]
async fn test_slow_endpoint_hits_fetch_timeout() {
    let server = delayed_server(Duration::from_secs(5)).await;
    let store = http_store(
        &format!("{}{}", server.uri(), JWKS_PATH),
        Duration::from_millis(200),
    );

    let result = store.resolve_key(Some(PRIMARY_KEY.kid), "RS256").await;
    assert!(matches!(result, Err(KeyStoreError::Fetch(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_during_slow_fetch_share_one_request() {
    let server = delayed_server(Duration::from_millis(300)).await;
    let store = Arc::new(http_store(
        &format!("{}{}", server.uri(), JWKS_PATH),
        Duration::from_secs(2),
    ));

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.resolve_key(Some(PRIMARY_KEY.kid), "RS256").await })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn test_expired_cache_refetches() {
    let jwks = MockJwksServer::start().await;
    jwks.serve_keys(&[&PRIMARY_KEY]).await;
    let store =
        http_store(&jwks.url(), Duration::from_secs(2)).with_ttl(Duration::from_millis(50));

    store.resolve_key(Some(PRIMARY_KEY.kid), "RS256").await.unwrap();
    store.resolve_key(Some(PRIMARY_KEY.kid), "RS256").await.unwrap();
    assert_eq!(jwks.fetch_count().await, 1);

    tokio::time::sleep(Duration::from_millis(120)).await;

    store.resolve_key(Some(PRIMARY_KEY.kid), "RS256").await.unwrap();
    assert_eq!(jwks.fetch_count().await, 2);
}

#[tokio::test]
async fn test_verification_survives_idp_outage_after_ttl() {
    let jwks = MockJwksServer::start().await;
    jwks.serve_keys(&[&PRIMARY_KEY]).await;

    let store = Arc::new(
        http_store(&jwks.url(), Duration::from_secs(2)).with_ttl(Duration::from_millis(30)),
    );
    let verifier = TokenVerifier::new(
        store.clone(),
        TEST_AUDIENCE.to_string(),
        TEST_ISSUER.to_string(),
    );
    let token = TestTokenBuilder::new().sign_rs256(&PRIMARY_KEY);

    assert!(verifier.verify_token(&token).await.is_ok());

    jwks.serve_status(503).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    let identity = verifier.verify_token(&token).await.unwrap();
    assert_eq!(identity.subject(), "test-subject");
    assert_eq!(jwks.fetch_count().await, 1);
    assert_eq!(store.key_count().await, 1);
}
