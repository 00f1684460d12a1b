//! Current caller handler.
//!
//! Minimal protected endpoint standing in for downstream handlers: it reads
//! the verified identity and echoes the subject.

use crate::auth::Identity;
use axum::Json;
use serde::Serialize;
use tracing::instrument;

/// Response for `/api/v1/me`.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    /// Subject of the verified token.
    pub sub: String,
}

/// Handler for GET /api/v1/me
///
/// ```json
/// { "sub": "user-123" }
/// ```
#[instrument(skip_all, name = "gate.handlers.me")]
pub async fn get_me(Identity(identity): Identity) -> Json<MeResponse> {
    tracing::debug!(target: "gate.handlers.me", "Returning verified subject");

    Json(MeResponse {
        sub: identity.subject().to_string(),
    })
}
