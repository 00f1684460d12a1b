//! Bearer token verification.
//!
//! Validates a bearer token end to end and extracts its subject. The pipeline
//! is linear and every failure is terminal:
//!
//! 1. `Authorization: Bearer <token>` header
//! 2. Size check, three segments, header decode
//! 3. `alg` (required) and `kid` (optional) from the header
//! 4. Key resolution through the [`KeyStore`]
//! 5. Signature over `header.payload`
//! 6. `aud`, `iss`, `exp`, `nbf` (each only when configured or present)
//! 7. Non-empty `sub`
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only RS256 with a published RSA key and HS256 with the shared secret are
//!   accepted; the header cannot steer an RSA key into HMAC verification
//! - Claims are only decoded after the signature checks out

use crate::auth::identity::VerifiedIdentity;
use crate::auth::key_set::VerificationKey;
use crate::auth::key_store::KeyStore;
use crate::config::Config;
use crate::errors::AuthError;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::Utc;
use common::jwt::{decode_header, decode_json_segment, CompactToken};
use jsonwebtoken::{crypto, Algorithm};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::instrument;

const BEARER_PREFIX: &str = "Bearer ";

/// Token verifier backed by a shared key store.
pub struct TokenVerifier {
    key_store: Arc<KeyStore>,

    /// Expected `aud`. Empty skips the check.
    audience: String,

    /// Expected `iss`. Empty skips the check.
    issuer: String,
}

impl TokenVerifier {
    /// Create a verifier with explicit audience and issuer expectations.
    pub fn new(key_store: Arc<KeyStore>, audience: String, issuer: String) -> Self {
        Self {
            key_store,
            audience,
            issuer,
        }
    }

    pub fn from_config(key_store: Arc<KeyStore>, config: &Config) -> Self {
        Self::new(key_store, config.audience.clone(), config.issuer.clone())
    }

    /// Verify the bearer token in a request's headers.
    #[instrument(skip_all)]
    pub async fn verify_request(&self, headers: &HeaderMap) -> Result<VerifiedIdentity, AuthError> {
        let token = extract_bearer_token(headers)?;
        self.verify_token(token).await
    }

    /// Verify a raw token against the current time.
    pub async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity, AuthError> {
        self.verify_at(token, Utc::now().timestamp()).await
    }

    /// Verify a raw token as of `now` (Unix seconds).
    pub async fn verify_at(&self, token: &str, now: i64) -> Result<VerifiedIdentity, AuthError> {
        let compact = CompactToken::parse(token).map_err(|e| {
            tracing::debug!(target: "gate.auth.verifier", error = %e, "Token structure invalid");
            AuthError::MalformedToken
        })?;

        let header = decode_header(compact.header()).map_err(|e| {
            tracing::debug!(target: "gate.auth.verifier", error = %e, "Token header undecodable");
            AuthError::MalformedToken
        })?;

        let alg = header.alg.ok_or_else(|| {
            tracing::debug!(target: "gate.auth.verifier", "Token header has no string alg");
            AuthError::AlgorithmMissing
        })?;

        let key = self
            .key_store
            .resolve_key(header.kid.as_deref(), &alg)
            .await
            .map_err(|e| {
                tracing::debug!(target: "gate.auth.verifier", error = %e, "Key resolution failed");
                AuthError::KeyResolutionFailed(e)
            })?;

        verify_signature(&compact, &alg, &key)?;

        let claims = decode_json_segment(compact.payload()).map_err(|e| {
            tracing::debug!(target: "gate.auth.verifier", error = %e, "Token payload undecodable");
            AuthError::MalformedToken
        })?;

        self.validate_claims(&claims, now)?;

        let subject = extract_subject(&claims)?;
        tracing::debug!(target: "gate.auth.verifier", alg = %alg, "Token verified");
        Ok(VerifiedIdentity::new(subject))
    }

    fn validate_claims(&self, claims: &Map<String, Value>, now: i64) -> Result<(), AuthError> {
        if !self.audience.is_empty()
            && claims.get("aud").and_then(Value::as_str) != Some(self.audience.as_str())
        {
            tracing::debug!(target: "gate.auth.verifier", "Token audience mismatch");
            return Err(AuthError::InvalidAudience);
        }

        if !self.issuer.is_empty()
            && claims.get("iss").and_then(Value::as_str) != Some(self.issuer.as_str())
        {
            tracing::debug!(target: "gate.auth.verifier", "Token issuer mismatch");
            return Err(AuthError::InvalidIssuer);
        }

        if let Some(exp) = claims.get("exp") {
            let exp = exp.as_f64().ok_or_else(|| {
                tracing::debug!(target: "gate.auth.verifier", "Token exp is not numeric");
                AuthError::MalformedToken
            })?;

            // exp == now is still valid
            if (now as f64) > exp {
                tracing::debug!(target: "gate.auth.verifier", "Token expired");
                return Err(AuthError::TokenExpired);
            }
        }

        if let Some(nbf) = claims.get("nbf") {
            let nbf = nbf.as_f64().ok_or_else(|| {
                tracing::debug!(target: "gate.auth.verifier", "Token nbf is not numeric");
                AuthError::MalformedToken
            })?;

            // Outside the validity window, same category as an expired token
            if (now as f64) < nbf {
                tracing::debug!(target: "gate.auth.verifier", "Token not yet valid");
                return Err(AuthError::TokenExpired);
            }
        }

        Ok(())
    }
}

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// # Errors
///
/// `MissingOrMalformedHeader` if the header is absent, not valid text, uses
/// another scheme, or carries an empty token.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "gate.auth.verifier", "Missing Authorization header");
            AuthError::MissingOrMalformedHeader
        })?;

    match value.strip_prefix(BEARER_PREFIX) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => {
            tracing::debug!(target: "gate.auth.verifier", "Invalid Authorization header format");
            Err(AuthError::MissingOrMalformedHeader)
        }
    }
}

/// Check the signature with the resolved key and declared algorithm.
fn verify_signature(
    compact: &CompactToken<'_>,
    alg: &str,
    key: &VerificationKey,
) -> Result<(), AuthError> {
    let (algorithm, decoding_key) = match (alg, key) {
        ("RS256", VerificationKey::Rsa(k)) => (Algorithm::RS256, k),
        ("HS256", VerificationKey::SharedSecret(k)) => (Algorithm::HS256, k),
        _ => {
            tracing::debug!(
                target: "gate.auth.verifier",
                alg = %alg,
                key = ?key,
                "Algorithm not accepted for resolved key"
            );
            return Err(AuthError::InvalidSignature);
        }
    };

    match crypto::verify(
        compact.signature(),
        compact.signing_input().as_bytes(),
        decoding_key,
        algorithm,
    ) {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::debug!(target: "gate.auth.verifier", "Token signature mismatch");
            Err(AuthError::InvalidSignature)
        }
        Err(e) => {
            tracing::debug!(target: "gate.auth.verifier", error = %e, "Token signature unverifiable");
            Err(AuthError::InvalidSignature)
        }
    }
}

fn extract_subject(claims: &Map<String, Value>) -> Result<String, AuthError> {
    match claims.get("sub").and_then(Value::as_str) {
        Some(sub) if !sub.is_empty() => Ok(sub.to_string()),
        _ => {
            tracing::debug!(target: "gate.auth.verifier", "Token has no subject");
            Err(AuthError::SubjectMissing)
        }
    }
}
