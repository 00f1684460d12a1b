//! Authentication middleware for protected routes.
//!
//! Runs the bearer token pipeline and attaches the verified identity to the
//! request. Rejected requests never reach the inner handler.

use crate::auth::{identity, TokenVerifier};
use crate::errors::AuthError;
use crate::observability::metrics::record_token_validation;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<TokenVerifier>,
}

/// Authentication middleware that validates bearer tokens.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - 401 Unauthorized, plain-text failure category and `WWW-Authenticate`
///   header if the token is missing or invalid
/// - Otherwise continues to the next handler with the identity attached
#[instrument(skip_all, name = "gate.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let start = Instant::now();

    let verified = match state.verifier.verify_request(req.headers()).await {
        Ok(verified) => verified,
        Err(e) => {
            record_token_validation("error", Some(e.category()), start.elapsed());
            tracing::info!(
                target: "gate.middleware.auth",
                category = e.category(),
                "Request rejected"
            );
            return Err(e);
        }
    };

    record_token_validation("success", None, start.elapsed());
    identity::attach(req.extensions_mut(), verified);

    Ok(next.run(req).await)
}
