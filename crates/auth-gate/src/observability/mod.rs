//! Observability module for the auth gate.
//!
//! Provides metrics definitions and recording helpers.

pub mod metrics;
