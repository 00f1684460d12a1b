//! Common utilities and types shared across the auth gate crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for compact JWT parsing helpers (size limit, segments, header)
pub mod jwt;
