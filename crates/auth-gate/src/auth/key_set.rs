//! Key set documents and where they come from.
//!
//! The identity provider publishes its signing keys as a JWKS document
//! (`{"keys": [...]}`). This module decodes that document into verification
//! keys and defines the [`KeySetSource`] seam the key store fetches through.
//!
//! # Security
//!
//! - Only entries with `kty = "RSA"` and `use = "sig"` become keys
//! - A malformed entry is skipped; it never poisons the rest of the document
//! - The RSA public exponent must be non-zero and fit in a `u64`

use crate::errors::KeyStoreError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::instrument;

/// JSON Web Key entry from the key set document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key ID, matched against the token header's `kid`.
    #[serde(default)]
    pub kid: Option<String>,

    /// Key type (only "RSA" is used).
    pub kty: String,

    /// Declared algorithm. Informational only.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (only "sig" is used).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus, base64url big-endian.
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent, base64url big-endian.
    #[serde(default)]
    pub e: Option<String>,
}

/// Raw key set document. Entries stay as JSON values so that each one can be
/// decoded (and rejected) on its own.
#[derive(Debug, Deserialize)]
pub struct KeySetDocument {
    pub keys: Vec<serde_json::Value>,
}

/// A key the verifier can check a signature with.
#[derive(Clone)]
pub enum VerificationKey {
    /// RSA public key rebuilt from a published modulus and exponent.
    Rsa(DecodingKey),

    /// Configured HS256 shared secret.
    SharedSecret(DecodingKey),
}

impl VerificationKey {
    /// Build a shared-secret key from raw secret bytes.
    pub fn shared_secret(secret: &[u8]) -> Self {
        VerificationKey::SharedSecret(DecodingKey::from_secret(secret))
    }

    /// Rebuild an RSA public key from base64url `n` and `e`.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if either component fails to
    /// decode, the modulus is zero, or the exponent is zero or wider than 64 bits.
    pub fn from_rsa_components(n: &str, e: &str) -> Result<Self, String> {
        let modulus = decode_unsigned(n).map_err(|err| format!("modulus: {err}"))?;
        let exponent = decode_unsigned(e).map_err(|err| format!("exponent: {err}"))?;

        if modulus.is_empty() {
            return Err("modulus is zero".to_string());
        }
        if exponent.is_empty() {
            return Err("exponent is zero".to_string());
        }
        if exponent.len() > std::mem::size_of::<u64>() {
            return Err("exponent does not fit in 64 bits".to_string());
        }

        Ok(VerificationKey::Rsa(DecodingKey::from_rsa_raw_components(
            &modulus, &exponent,
        )))
    }

    /// `true` for keys published by the identity provider.
    pub fn is_rsa(&self) -> bool {
        matches!(self, VerificationKey::Rsa(_))
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationKey::Rsa(_) => f.write_str("VerificationKey::Rsa(..)"),
            VerificationKey::SharedSecret(_) => {
                f.write_str("VerificationKey::SharedSecret([REDACTED])")
            }
        }
    }
}

/// Base64url-decode an unsigned big-endian integer, stripping leading zero bytes.
fn decode_unsigned(value: &str) -> Result<Vec<u8>, String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| format!("invalid base64url: {e}"))?;
    let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    Ok(bytes.get(first_nonzero..).map(<[u8]>::to_vec).unwrap_or_default())
}

/// Decode a key set document into a `kid -> key` map.
///
/// # Errors
///
/// Returns `KeyStoreError::Document` if the body is not a JSON object with a
/// `keys` array. Individual bad entries are skipped, not reported.
pub fn parse_key_set(body: &[u8]) -> Result<BTreeMap<String, VerificationKey>, KeyStoreError> {
    let document: KeySetDocument = serde_json::from_slice(body).map_err(|e| {
        tracing::error!(target: "gate.auth.key_set", error = %e, "Failed to parse key set document");
        KeyStoreError::Document(e.to_string())
    })?;

    let total = document.keys.len();
    let mut keys = BTreeMap::new();

    for entry in document.keys {
        let jwk: Jwk = match serde_json::from_value(entry) {
            Ok(jwk) => jwk,
            Err(e) => {
                tracing::debug!(target: "gate.auth.key_set", error = %e, "Skipping malformed key entry");
                continue;
            }
        };

        if jwk.kty != "RSA" || jwk.key_use.as_deref() != Some("sig") {
            tracing::debug!(
                target: "gate.auth.key_set",
                kty = %jwk.kty,
                key_use = ?jwk.key_use,
                "Skipping non-RSA or non-signing key"
            );
            continue;
        }

        let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
            tracing::debug!(target: "gate.auth.key_set", "Skipping RSA key missing kid, n or e");
            continue;
        };

        match VerificationKey::from_rsa_components(&n, &e) {
            Ok(key) => {
                keys.insert(kid, key);
            }
            Err(reason) => {
                tracing::warn!(
                    target: "gate.auth.key_set",
                    kid = %kid,
                    reason = %reason,
                    "Skipping RSA key with invalid components"
                );
            }
        }
    }

    tracing::debug!(
        target: "gate.auth.key_set",
        total_entries = total,
        usable_keys = keys.len(),
        "Parsed key set document"
    );

    Ok(keys)
}

/// Where key set documents come from.
///
/// Production uses [`HttpKeySetSource`]; tests substitute [`mock::MockKeySetSource`].
#[async_trait::async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetch the raw key set document.
    async fn fetch(&self) -> Result<Vec<u8>, KeyStoreError>;
}

/// Fetches the key set document over HTTP(S).
pub struct HttpKeySetSource {
    jwks_url: String,
    http_client: reqwest::Client,
}

impl HttpKeySetSource {
    /// Create a source for `jwks_url` with a per-request `timeout`.
    pub fn new(jwks_url: String, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gate.auth.key_set", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
        }
    }
}

#[async_trait::async_trait]
impl KeySetSource for HttpKeySetSource {
    #[instrument(skip_all)]
    async fn fetch(&self) -> Result<Vec<u8>, KeyStoreError> {
        tracing::debug!(target: "gate.auth.key_set", url = %self.jwks_url, "Fetching key set");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "gate.auth.key_set", error = %e, "Failed to fetch key set");
                KeyStoreError::Fetch(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(
                target: "gate.auth.key_set",
                status = %status,
                "Key set endpoint returned error"
            );
            return Err(KeyStoreError::Fetch(format!("unexpected status {status}")));
        }

        let body = response.bytes().await.map_err(|e| {
            tracing::error!(target: "gate.auth.key_set", error = %e, "Failed to read key set body");
            KeyStoreError::Fetch(e.to_string())
        })?;

        Ok(body.to_vec())
    }
}

/// Mock key set source for testing.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves canned key set responses and counts fetches.
    ///
    /// Responses are served in order; the last one repeats once the queue
    /// is exhausted.
    pub struct MockKeySetSource {
        responses: Mutex<Vec<Result<Vec<u8>, KeyStoreError>>>,
        delay: Option<Duration>,
        fetch_count: AtomicUsize,
    }

    impl MockKeySetSource {
        /// Always serve `document`.
        pub fn serving(document: impl Into<Vec<u8>>) -> Self {
            Self::with_responses(vec![Ok(document.into())])
        }

        /// Always fail with `error`.
        pub fn failing(error: KeyStoreError) -> Self {
            Self::with_responses(vec![Err(error)])
        }

        /// Serve `responses` in sequence.
        pub fn with_responses(responses: Vec<Result<Vec<u8>, KeyStoreError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                delay: None,
                fetch_count: AtomicUsize::new(0),
            }
        }

        /// Sleep for `delay` inside every fetch.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Number of fetches made so far.
        pub fn fetch_count(&self) -> usize {
            self.fetch_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl KeySetSource for MockKeySetSource {
        async fn fetch(&self) -> Result<Vec<u8>, KeyStoreError> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let mut responses = self
                .responses
                .lock()
                .map_err(|_| KeyStoreError::Fetch("mock source poisoned".to_string()))?;

            if responses.len() > 1 {
                return responses.remove(0);
            }

            responses
                .first()
                .cloned()
                .unwrap_or_else(|| Err(KeyStoreError::Fetch("no mock response".to_string())))
        }
    }
}
