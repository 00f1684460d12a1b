//! Auth gate error types.
//!
//! Every verification failure maps to HTTP 401 via the `IntoResponse` impl.
//! The response body names only the failure category; token contents, claim
//! values and upstream error details are logged server-side at most.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Realm advertised in the `WWW-Authenticate` challenge.
const AUTH_REALM: &str = "auth-gate";

/// Failures while resolving a verification key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyStoreError {
    /// The token names a `kid` the identity provider does not publish.
    #[error("no published key matches the token's key id")]
    KeyNotFound,

    /// Keyless HS256 token but no shared secret is configured.
    #[error("no shared secret configured for HS256")]
    MissingSharedSecret,

    /// Keyless asymmetric token and the key set is empty.
    #[error("no keys available in the key set")]
    NoKeysAvailable,

    /// Keyless asymmetric token while the hardened policy is on.
    #[error("asymmetric tokens must carry a key id")]
    KidRequired,

    /// Transport failure, non-2xx status or timeout while fetching.
    #[error("key set fetch failed: {0}")]
    Fetch(String),

    /// The fetched document could not be decoded.
    #[error("key set document invalid: {0}")]
    Document(String),
}

impl KeyStoreError {
    /// Metric/log label for this error.
    pub fn category(&self) -> &'static str {
        match self {
            KeyStoreError::KeyNotFound => "key_not_found",
            KeyStoreError::MissingSharedSecret => "missing_shared_secret",
            KeyStoreError::NoKeysAvailable => "no_keys_available",
            KeyStoreError::KidRequired => "kid_required",
            KeyStoreError::Fetch(_) => "fetch",
            KeyStoreError::Document(_) => "document",
        }
    }
}

/// Identity accessor failure.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The request never passed verification.
    #[error("no verified identity on request")]
    IdentityNotFound,
}

impl From<IdentityError> for AuthError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::IdentityNotFound => AuthError::IdentityNotFound,
        }
    }
}

/// Request authentication failures.
///
/// All variants surface as 401 Unauthorized; the variants stay distinct for
/// logging, metrics and tests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing or malformed Authorization header")]
    MissingOrMalformedHeader,

    #[error("malformed token")]
    MalformedToken,

    #[error("token header has no algorithm")]
    AlgorithmMissing,

    #[error("key resolution failed: {0}")]
    KeyResolutionFailed(#[from] KeyStoreError),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid audience")]
    InvalidAudience,

    #[error("invalid issuer")]
    InvalidIssuer,

    #[error("token expired")]
    TokenExpired,

    #[error("token has no subject")]
    SubjectMissing,

    /// The request never passed verification.
    #[error("no verified identity on request")]
    IdentityNotFound,
}

impl AuthError {
    /// Stable category string used in logs, metric labels and response bodies.
    pub fn category(&self) -> &'static str {
        match self {
            AuthError::MissingOrMalformedHeader => "MissingOrMalformedHeader",
            AuthError::MalformedToken => "MalformedToken",
            AuthError::AlgorithmMissing => "AlgorithmMissing",
            AuthError::KeyResolutionFailed(_) => "KeyResolutionFailed",
            AuthError::InvalidSignature => "InvalidSignature",
            AuthError::InvalidAudience => "InvalidAudience",
            AuthError::InvalidIssuer => "InvalidIssuer",
            AuthError::TokenExpired => "TokenExpired",
            AuthError::SubjectMissing => "SubjectMissing",
            AuthError::IdentityNotFound => "IdentityNotFound",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::KeyResolutionFailed(inner) = &self {
            tracing::warn!(
                target: "gate.errors",
                reason = inner.category(),
                "Rejecting request: key resolution failed"
            );
        }

        let body = format!("Unauthorized: {}", self.category());
        let mut response = (StatusCode::UNAUTHORIZED, body).into_response();

        let challenge = format!("Bearer realm=\"{AUTH_REALM}\", error=\"invalid_token\"");
        if let Ok(header_value) = HeaderValue::from_str(&challenge) {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, header_value);
        }

        response
    }
}
