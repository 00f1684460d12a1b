//! Builder patterns for test token construction
//!
//! Provides a fluent API for claims plus signing helpers for the algorithms
//! the gate accepts, and a raw encoder for deliberately broken tokens.

use crate::crypto_fixtures::RsaFixture;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};

/// Audience used by test configurations.
pub const TEST_AUDIENCE: &str = "gate-test-api";

/// Issuer used by test configurations.
pub const TEST_ISSUER: &str = "https://idp.test.local/oidc";

/// Builder for creating signed test tokens
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_subject("alice")
///     .expires_in(3600)
///     .sign_rs256(&PRIMARY_KEY);
/// ```
#[derive(Debug, Clone)]
pub struct TestTokenBuilder {
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Defaults: subject `test-subject`, test audience and issuer, one hour expiry.
    pub fn new() -> Self {
        let now = Utc::now();
        let claims = json!({
            "sub": "test-subject",
            "aud": TEST_AUDIENCE,
            "iss": TEST_ISSUER,
            "iat": now.timestamp(),
            "exp": (now + Duration::seconds(3600)).timestamp(),
        });

        Self {
            claims: match claims {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        }
    }

    /// Set the subject
    pub fn for_subject(self, subject: &str) -> Self {
        self.claim("sub", json!(subject))
    }

    /// Set the audience
    pub fn audience(self, audience: &str) -> Self {
        self.claim("aud", json!(audience))
    }

    /// Set the issuer
    pub fn issuer(self, issuer: &str) -> Self {
        self.claim("iss", json!(issuer))
    }

    /// Set expiration in seconds from now (negative for already expired)
    pub fn expires_in(self, seconds: i64) -> Self {
        self.expires_at((Utc::now() + Duration::seconds(seconds)).timestamp())
    }

    /// Set an absolute expiration timestamp
    pub fn expires_at(self, timestamp: i64) -> Self {
        self.claim("exp", json!(timestamp))
    }

    /// Set or replace any claim
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim
    pub fn without(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// The claims as a JSON value
    pub fn build_claims(&self) -> Value {
        Value::Object(self.claims.clone())
    }

    /// Sign with RS256, naming the fixture's `kid` in the header
    pub fn sign_rs256(&self, key: &RsaFixture) -> String {
        self.sign_rs256_with_kid(key, Some(key.kid))
    }

    /// Sign with RS256 using an explicit (or absent) header `kid`
    pub fn sign_rs256_with_kid(&self, key: &RsaFixture, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(ToString::to_string);

        let encoding_key = EncodingKey::from_rsa_pem(key.private_pem.as_bytes())
            .expect("fixture PEM should parse");
        encode(&header, &self.build_claims(), &encoding_key).expect("RS256 signing should succeed")
    }

    /// Sign with HS256 and no `kid`
    pub fn sign_hs256(&self, secret: &str) -> String {
        let header = Header::new(Algorithm::HS256);
        encode(
            &header,
            &self.build_claims(),
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .expect("HS256 signing should succeed")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble a compact token from arbitrary header/payload JSON and a raw
/// signature segment. Nothing is signed.
pub fn raw_token(header: &Value, payload: &Value, signature: &str) -> String {
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(payload.to_string()),
        signature
    )
}

/// Format an `Authorization` header value.
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
