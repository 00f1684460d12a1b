//! Authentication module for the auth gate.
//!
//! # Components
//!
//! - `key_set` - Key set document decoding and the fetch seam
//! - `key_store` - Cached identity provider keys with single-flight refresh
//! - `verifier` - Bearer token verification pipeline
//! - `identity` - Verified identity attached to requests

pub mod identity;
pub mod key_set;
pub mod key_store;
pub mod verifier;

pub use identity::{verified_identity, Identity, VerifiedIdentity};
pub use key_set::{HttpKeySetSource, KeySetSource, VerificationKey};
pub use key_store::KeyStore;
pub use verifier::TokenVerifier;
