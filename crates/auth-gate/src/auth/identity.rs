//! The verified identity attached to authenticated requests.
//!
//! The identity is stored in the request extensions under a private wrapper
//! type, so nothing outside this module can insert or shadow it. Handlers
//! read it through [`verified_identity`] or the [`Identity`] extractor.

use crate::errors::{AuthError, IdentityError};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts, http::Extensions};
use std::fmt;

/// Subject identifier of a caller whose token passed verification.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    subject: String,
}

impl VerifiedIdentity {
    /// Only the verifier mints identities.
    pub(crate) fn new(subject: String) -> Self {
        Self { subject }
    }

    /// The `sub` claim of the verified token. Never empty.
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl fmt::Debug for VerifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedIdentity")
            .field("subject", &"[REDACTED]")
            .finish()
    }
}

/// Private extension key.
#[derive(Clone)]
struct IdentityExtension(VerifiedIdentity);

/// Attach `identity` to a request's extensions.
pub(crate) fn attach(extensions: &mut Extensions, identity: VerifiedIdentity) {
    extensions.insert(IdentityExtension(identity));
}

/// Read the verified identity from a request's extensions.
///
/// # Errors
///
/// Returns `IdentityNotFound` if the request never passed the auth middleware.
pub fn verified_identity(extensions: &Extensions) -> Result<&VerifiedIdentity, IdentityError> {
    extensions
        .get::<IdentityExtension>()
        .map(|ext| &ext.0)
        .ok_or(IdentityError::IdentityNotFound)
}

/// Extractor for handlers behind the auth middleware.
///
/// Rejects with 401 `IdentityNotFound` when used on an unprotected route.
#[derive(Debug, Clone)]
pub struct Identity(pub VerifiedIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = verified_identity(&parts.extensions).map_err(|e| {
            tracing::error!(target: "gate.auth.identity", "Identity requested on a request that skipped verification");
            AuthError::from(e)
        })?;
        Ok(Identity(identity.clone()))
    }
}
