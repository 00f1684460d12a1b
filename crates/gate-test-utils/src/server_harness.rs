//! Test server harness for E2E testing
//!
//! Provides `TestGateServer` for spawning real auth gate instances in tests.

use auth_gate::config::Config;
use auth_gate::routes::{self, init_metrics_recorder, AppState};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;

use crate::token_builders::{TEST_AUDIENCE, TEST_ISSUER};
use crate::crypto_fixtures::TEST_SHARED_SECRET;

/// Process-wide metrics handle; the global recorder can only be installed once.
static TEST_METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics handle shared by every test server in this process.
pub fn test_metrics_handle() -> PrometheusHandle {
    TEST_METRICS_HANDLE
        .get_or_init(|| {
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// Environment for a gate pointed at `jwks_url`, with the test audience,
/// issuer and shared secret.
pub fn test_config_vars(jwks_url: &str) -> HashMap<String, String> {
    HashMap::from([
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("JWKS_URL".to_string(), jwks_url.to_string()),
        ("JWT_AUDIENCE".to_string(), TEST_AUDIENCE.to_string()),
        ("JWT_ISSUER".to_string(), TEST_ISSUER.to_string()),
        ("JWT_SHARED_SECRET".to_string(), TEST_SHARED_SECRET.to_string()),
        ("JWKS_FETCH_TIMEOUT_SECONDS".to_string(), "2".to_string()),
    ])
}

/// Test config built from [`test_config_vars`].
pub fn test_config(jwks_url: &str) -> Config {
    Config::from_vars(&test_config_vars(jwks_url)).expect("test config should load")
}

/// Test harness for spawning the auth gate in E2E tests.
///
/// # Example
/// ```rust,ignore
/// let jwks = MockJwksServer::start().await;
/// jwks.serve_keys(&[&PRIMARY_KEY]).await;
/// let server = TestGateServer::spawn(test_config(&jwks.url())).await?;
///
/// let response = reqwest::get(format!("{}/health", server.url())).await?;
/// assert_eq!(response.status(), 200);
/// ```
pub struct TestGateServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    _handle: JoinHandle<()>,
}

impl TestGateServer {
    /// Spawn a gate on a random local port.
    pub async fn spawn(config: Config) -> Result<Self, anyhow::Error> {
        let state = Arc::new(AppState::from_config(config));
        let app = routes::build_routes(state.clone(), test_metrics_handle());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// Base URL, e.g. `http://127.0.0.1:54321`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Shared application state (key store, verifier, config).
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }
}

impl Drop for TestGateServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
