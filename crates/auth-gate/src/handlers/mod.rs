//! HTTP request handlers.

pub mod health;
pub mod me;
pub mod metrics;

pub use health::{health_check, readiness_check};
pub use me::get_me;
pub use metrics::metrics_handler;
