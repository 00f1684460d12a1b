//! Secret types for keeping key material out of logs.
//!
//! Re-exports the [`secrecy`] types used for the HS256 shared secret and any
//! other credential the gate handles. `Debug` on these types is redacted, so a
//! struct that derives `Debug` while holding a secret stays safe to log.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{optional_secret, ExposeSecret};
//!
//! let secret = optional_secret(Some("hs256-shared-secret")).expect("non-empty");
//! assert_eq!(secret.expose_secret(), "hs256-shared-secret");
//! assert!(!format!("{secret:?}").contains("hs256"));
//!
//! // Empty configuration values mean "not configured"
//! assert!(optional_secret(Some("")).is_none());
//! ```

pub use secrecy::{ExposeSecret, SecretString};

/// Wrap an optional configuration value as a secret.
///
/// Environment loaders hand back empty strings for variables that are set but
/// blank; those are treated the same as unset.
#[must_use]
pub fn optional_secret(value: Option<&str>) -> Option<SecretString> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| SecretString::from(v.to_string()))
}
