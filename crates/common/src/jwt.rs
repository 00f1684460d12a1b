//! Compact JWT helpers shared by the gate crates.
//!
//! These functions only deal with the *shape* of a token: its size, its three
//! dot-separated segments and the base64url JSON inside them. They never look
//! at signatures or claim values; that is the verifier's job.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE any decoding (DoS prevention)
//! - Header fields are read without trusting them; `alg` and `kid` only steer
//!   key selection and must still be backed by a valid signature
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{CompactToken, decode_header};
//!
//! let compact = CompactToken::parse(token)?;
//! let header = decode_header(compact.header())?;
//! // header.alg / header.kid drive key resolution
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{Map, Value};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum accepted token size in bytes (8KB).
///
/// Typical identity-provider tokens are well under 2KB. Anything larger is
/// rejected before base64 decoding or any cryptographic work is attempted.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

// =============================================================================
// Error Types
// =============================================================================

/// Structural problems with a compact JWT.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtFormatError {
    /// Token exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("token exceeds maximum size")]
    TokenTooLarge,

    /// Token does not consist of exactly three segments.
    #[error("token must have exactly three segments")]
    WrongSegmentCount,

    /// A segment is not valid unpadded base64url.
    #[error("token segment is not valid base64url")]
    InvalidEncoding,

    /// A segment does not decode to a JSON object.
    #[error("token segment is not a JSON object")]
    InvalidJson,
}

// =============================================================================
// Types
// =============================================================================

/// A compact JWT split into its three segments.
///
/// Borrowed from the original token string; nothing is decoded yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactToken<'a> {
    signing_input: &'a str,
    header: &'a str,
    payload: &'a str,
    signature: &'a str,
}

impl<'a> CompactToken<'a> {
    /// Split `token` into header, payload and signature segments.
    ///
    /// # Errors
    ///
    /// - `TokenTooLarge` if the token is over the size limit
    /// - `WrongSegmentCount` unless there are exactly two dots
    pub fn parse(token: &'a str) -> Result<Self, JwtFormatError> {
        if token.len() > MAX_JWT_SIZE_BYTES {
            tracing::debug!(
                target: "common.jwt",
                token_size = token.len(),
                max_size = MAX_JWT_SIZE_BYTES,
                "Token rejected: size exceeds maximum allowed"
            );
            return Err(JwtFormatError::TokenTooLarge);
        }

        let (signing_input, signature) = token
            .rsplit_once('.')
            .ok_or(JwtFormatError::WrongSegmentCount)?;
        let (header, payload) = signing_input
            .split_once('.')
            .ok_or(JwtFormatError::WrongSegmentCount)?;

        if payload.contains('.') {
            tracing::debug!(target: "common.jwt", "Token rejected: too many segments");
            return Err(JwtFormatError::WrongSegmentCount);
        }

        Ok(Self {
            signing_input,
            header,
            payload,
            signature,
        })
    }

    /// `header.payload`, the bytes covered by the signature.
    #[must_use]
    pub fn signing_input(&self) -> &'a str {
        self.signing_input
    }

    /// Encoded header segment.
    #[must_use]
    pub fn header(&self) -> &'a str {
        self.header
    }

    /// Encoded payload segment.
    #[must_use]
    pub fn payload(&self) -> &'a str {
        self.payload
    }

    /// Encoded signature segment.
    #[must_use]
    pub fn signature(&self) -> &'a str {
        self.signature
    }
}

/// The header fields the gate cares about.
///
/// Both fields are optional here; the verifier decides which absences are
/// errors. A field with a non-string JSON value is reported as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenHeader {
    /// Declared signing algorithm (e.g. `RS256`).
    pub alg: Option<String>,

    /// Key identifier used to select a published key.
    pub kid: Option<String>,
}

// =============================================================================
// Functions
// =============================================================================

/// Decode a base64url segment into a JSON object.
///
/// # Errors
///
/// - `InvalidEncoding` if the segment is not unpadded base64url
/// - `InvalidJson` if the bytes are not a JSON object
pub fn decode_json_segment(segment: &str) -> Result<Map<String, Value>, JwtFormatError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode token segment base64");
        JwtFormatError::InvalidEncoding
    })?;

    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => {
            tracing::debug!(target: "common.jwt", "Token segment is JSON but not an object");
            Err(JwtFormatError::InvalidJson)
        }
        Err(e) => {
            tracing::debug!(target: "common.jwt", error = %e, "Failed to parse token segment JSON");
            Err(JwtFormatError::InvalidJson)
        }
    }
}

/// Decode the header segment without verifying anything.
///
/// # Errors
///
/// Same as [`decode_json_segment`].
pub fn decode_header(segment: &str) -> Result<TokenHeader, JwtFormatError> {
    let map = decode_json_segment(segment)?;

    let string_field = |name: &str| {
        map.get(name)
            .and_then(Value::as_str)
            .map(ToString::to_string)
    };

    Ok(TokenHeader {
        alg: string_field("alg"),
        kid: string_field("kid"),
    })
}

// =============================================================================
// Tests
// =============================================================================
