//! Health check handlers.
//!
//! - `/health`: Liveness probe - returns OK if the process is running
//! - `/ready`: Readiness probe - checks that signing keys are available

use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Readiness probe response body.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,

    pub jwks: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness probe handler.
///
/// Does NOT check any dependencies; failure means the process is hung.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Ready when the key cache is fresh and non-empty. Otherwise the key set is
/// fetched once; the gate is ready if that yields at least one key, or if the
/// fetch fails while keys from an earlier refresh are still cached.
///
/// ## Security
///
/// Error messages are intentionally generic. Actual errors are logged
/// server-side.
#[tracing::instrument(skip_all, name = "gate.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let key_store = &state.key_store;

    let mut jwks = "available";

    if !(key_store.is_fresh().await && key_store.key_count().await > 0) {
        if let Err(e) = key_store.force_refresh().await {
            if key_store.key_count().await == 0 {
                tracing::warn!(target: "gate.health", error = %e, "Readiness check failed: key set unavailable");
                return not_ready("unavailable");
            }
            tracing::warn!(target: "gate.health", error = %e, "Key set refresh failed, still ready on cached keys");
            jwks = "stale";
        }
    }

    if key_store.key_count().await == 0 {
        tracing::warn!(target: "gate.health", "Readiness check failed: key set has no usable keys");
        return not_ready("empty");
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            jwks,
            error: None,
        }),
    )
}

fn not_ready(jwks: &'static str) -> (StatusCode, Json<ReadinessResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ReadinessResponse {
            status: "not_ready",
            jwks,
            error: Some("Service dependencies unavailable".to_string()),
        }),
    )
}
