//! Auth Gate Library
//!
//! Bearer-token authentication gate for HTTP services. Inbound requests must
//! carry a JWT signed by an external identity provider (RS256, keys published
//! as a JWKS document) or by a configured shared secret (HS256). Verified
//! requests continue with the token's subject attached; everything else is
//! rejected with 401.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/auth.rs -> auth/verifier.rs -> auth/key_store.rs
//!                                                        -> auth/key_set.rs (JWKS fetch)
//! ```
//!
//! # Modules
//!
//! - `auth` - Key store, token verifier, verified identity
//! - `config` - Service configuration from environment
//! - `errors` - Error taxonomy with HTTP mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Auth gate and HTTP metrics middleware
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router setup

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
