//! Auth gate configuration.
//!
//! Configuration is loaded from environment variables. The HS256 shared
//! secret is redacted in Debug output.

use common::secret::{optional_secret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default key set cache TTL in seconds (1 hour).
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 3600;

/// Default outbound key set fetch timeout in seconds.
pub const DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 10;

/// Maximum allowed outbound key set fetch timeout in seconds.
pub const MAX_JWKS_FETCH_TIMEOUT_SECONDS: u64 = 60;

/// Auth gate configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Identity provider key set (JWKS) URL.
    pub jwks_url: String,

    /// Expected `aud` claim. Empty disables the check.
    pub audience: String,

    /// Expected `iss` claim. Empty disables the check.
    pub issuer: String,

    /// Shared secret for keyless HS256 tokens.
    pub shared_secret: Option<SecretString>,

    /// How long a fetched key set stays fresh.
    pub jwks_cache_ttl: Duration,

    /// Upper bound on a single key set fetch.
    pub jwks_fetch_timeout: Duration,

    /// Reject asymmetric tokens that omit `kid` instead of falling back to
    /// an arbitrary cached key.
    pub require_kid_for_asymmetric: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("jwks_url", &self.jwks_url)
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .field(
                "shared_secret",
                &self.shared_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("jwks_cache_ttl", &self.jwks_cache_ttl)
            .field("jwks_fetch_timeout", &self.jwks_fetch_timeout)
            .field(
                "require_kid_for_asymmetric",
                &self.require_kid_for_asymmetric,
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid JWKS cache TTL configuration: {0}")]
    InvalidCacheTtl(String),

    #[error("Invalid JWKS fetch timeout configuration: {0}")]
    InvalidFetchTimeout(String),

    #[error("Invalid boolean for {0}: expected 'true' or 'false', got '{1}'")]
    InvalidBool(String, String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let jwks_url = vars
            .get("JWKS_URL")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("JWKS_URL".to_string()))?
            .clone();

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let audience = vars.get("JWT_AUDIENCE").cloned().unwrap_or_default();
        let issuer = vars.get("JWT_ISSUER").cloned().unwrap_or_default();
        let shared_secret = optional_secret(vars.get("JWT_SHARED_SECRET").map(String::as_str));

        let ttl_seconds = if let Some(value_str) = vars.get("JWKS_CACHE_TTL_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidCacheTtl(format!(
                    "JWKS_CACHE_TTL_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidCacheTtl(
                    "JWKS_CACHE_TTL_SECONDS must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_JWKS_CACHE_TTL_SECONDS
        };

        let timeout_seconds = if let Some(value_str) = vars.get("JWKS_FETCH_TIMEOUT_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidFetchTimeout(format!(
                    "JWKS_FETCH_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 || value > MAX_JWKS_FETCH_TIMEOUT_SECONDS {
                return Err(ConfigError::InvalidFetchTimeout(format!(
                    "JWKS_FETCH_TIMEOUT_SECONDS must be between 1 and {}, got {}",
                    MAX_JWKS_FETCH_TIMEOUT_SECONDS, value
                )));
            }

            value
        } else {
            DEFAULT_JWKS_FETCH_TIMEOUT_SECONDS
        };

        let require_kid_for_asymmetric = match vars.get("REQUIRE_KID_FOR_ASYMMETRIC") {
            Some(value_str) => parse_bool("REQUIRE_KID_FOR_ASYMMETRIC", value_str)?,
            None => false,
        };

        Ok(Config {
            bind_address,
            jwks_url,
            audience,
            issuer,
            shared_secret,
            jwks_cache_ttl: Duration::from_secs(ttl_seconds),
            jwks_fetch_timeout: Duration::from_secs(timeout_seconds),
            require_kid_for_asymmetric,
        })
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool(name.to_string(), value.to_string())),
    }
}
