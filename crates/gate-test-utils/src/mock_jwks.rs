//! Mock identity provider key set endpoint
//!
//! Wraps a wiremock `MockServer` serving `/.well-known/jwks.json`.

use crate::crypto_fixtures::{jwks_document, RsaFixture};
use serde_json::Value;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock key set is served from.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// A mock key set endpoint.
///
/// # Example
/// ```rust,ignore
/// let jwks = MockJwksServer::start().await;
/// jwks.serve_keys(&[&PRIMARY_KEY]).await;
/// let config = test_config(&jwks.url());
/// ```
pub struct MockJwksServer {
    server: MockServer,
}

impl MockJwksServer {
    /// Start a mock server with nothing mounted.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Full key set URL.
    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Replace all mounted responses with a key set publishing `keys`.
    pub async fn serve_keys(&self, keys: &[&RsaFixture]) {
        self.serve_document(jwks_document(keys)).await;
    }

    /// Replace all mounted responses with an arbitrary JSON document.
    pub async fn serve_document(&self, document: Value) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .mount(&self.server)
            .await;
    }

    /// Replace all mounted responses with a body that is not JSON.
    pub async fn serve_malformed(&self) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"keys\": [not json"))
            .mount(&self.server)
            .await;
    }

    /// Replace all mounted responses with an HTTP error status.
    pub async fn serve_status(&self, status: u16) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Number of key set fetches received since the last `serve_*` call.
    pub async fn fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|r| r.url.path() == JWKS_PATH)
                    .count()
            })
            .unwrap_or(0)
    }
}
