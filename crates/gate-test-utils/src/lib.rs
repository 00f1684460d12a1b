//! # Gate Test Utilities
//!
//! Shared test utilities for the auth gate.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed RSA keys, shared secret)
//! - Token builders (TestTokenBuilder, raw token encoder)
//! - A mock key set endpoint (MockJwksServer, wiremock)
//! - Server test harness (TestGateServer for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gate_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let jwks = MockJwksServer::start().await;
//!     jwks.serve_keys(&[&PRIMARY_KEY]).await;
//!
//!     let token = TestTokenBuilder::new()
//!         .for_subject("alice")
//!         .sign_rs256(&PRIMARY_KEY);
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_jwks;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use mock_jwks::*;
pub use server_harness::*;
pub use token_builders::*;
