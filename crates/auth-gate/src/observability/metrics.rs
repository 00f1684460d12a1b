//! Metrics definitions for the auth gate.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gate_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: a handful of known paths plus `/other`
//! - `status`: 3 values (success, error, timeout)
//! - `error_category`: bounded by `AuthError` variants

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("gate_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Cache hits verify in well under a millisecond; misses pay a fetch
        .set_buckets_for_metric(
            Matcher::Prefix("gate_token_validation".to_string()),
            &[
                0.0005, 0.001, 0.002, 0.005, 0.010, 0.050, 0.100, 0.500, 1.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set token validation buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("gate_jwks_refresh".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set JWKS refresh buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `gate_http_requests_total`, `gate_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("gate_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("gate_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion.
///
/// Unauthenticated callers can hit arbitrary paths, so anything unknown
/// collapses to `/other`.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/api/v1/me" => "/api/v1/me",
        _ => "/other",
    }
}

// ============================================================================
// Token Validation Metrics
// ============================================================================

/// Record the outcome of one bearer token verification.
///
/// Metric: `gate_token_validations_total`, `gate_token_validation_duration_seconds`
/// Labels: `status`, `error_category`
pub fn record_token_validation(status: &str, error_category: Option<&str>, duration: Duration) {
    histogram!("gate_token_validation_duration_seconds",
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("gate_token_validations_total",
        "status" => status.to_string(),
        "error_category" => error_category.unwrap_or("none").to_string()
    )
    .increment(1);
}

// ============================================================================
// Key Set Metrics
// ============================================================================

/// Record a key set refresh attempt.
///
/// Metric: `gate_jwks_refresh_total`, `gate_jwks_refresh_duration_seconds`
/// Labels: `status`
pub fn record_jwks_refresh(status: &str, duration: Duration) {
    histogram!("gate_jwks_refresh_duration_seconds").record(duration.as_secs_f64());

    counter!("gate_jwks_refresh_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Set the number of keys currently cached.
///
/// Metric: `gate_jwks_cached_keys`
pub fn set_jwks_cached_keys(count: usize) {
    gauge!("gate_jwks_cached_keys").set(count as f64);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::DebuggingRecorder;

    // Recording without an installed recorder goes to the no-op recorder and
    // must not panic.

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/health", 200, Duration::from_millis(5));
        record_http_request("GET", "/api/v1/me", 200, Duration::from_millis(50));
        record_http_request("GET", "/api/v1/me", 401, Duration::from_millis(10));
        record_http_request("GET", "/wp-admin", 404, Duration::from_millis(1));
        record_http_request("GET", "/api/v1/me", 408, Duration::from_secs(30));
    }

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
        assert_eq!(categorize_status_code(401), "error");
        assert_eq!(categorize_status_code(503), "error");
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/health"), "/health");
        assert_eq!(normalize_endpoint("/ready"), "/ready");
        assert_eq!(normalize_endpoint("/metrics"), "/metrics");
        assert_eq!(normalize_endpoint("/api/v1/me"), "/api/v1/me");
        assert_eq!(normalize_endpoint("/api/v1/me/extra"), "/other");
        assert_eq!(normalize_endpoint("/../../etc/passwd"), "/other");
    }

    #[test]
    fn test_record_token_validation() {
        record_token_validation("success", None, Duration::from_micros(300));
        record_token_validation("error", Some("TokenExpired"), Duration::from_micros(200));
        record_token_validation("error", Some("KeyResolutionFailed"), Duration::from_secs(10));
    }

    #[test]
    fn test_record_jwks_metrics() {
        record_jwks_refresh("success", Duration::from_millis(80));
        record_jwks_refresh("error", Duration::from_secs(10));
        set_jwks_cached_keys(3);
    }

    #[test]
    fn test_metric_names_are_recorded() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_http_request("GET", "/api/v1/me", 200, Duration::from_millis(5));
            record_token_validation("success", None, Duration::from_millis(1));
            record_jwks_refresh("success", Duration::from_millis(40));
            set_jwks_cached_keys(2);
        });

        let names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "gate_http_requests_total",
            "gate_http_request_duration_seconds",
            "gate_token_validations_total",
            "gate_token_validation_duration_seconds",
            "gate_jwks_refresh_total",
            "gate_jwks_refresh_duration_seconds",
            "gate_jwks_cached_keys",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}, got {names:?}"
            );
        }
    }
}
