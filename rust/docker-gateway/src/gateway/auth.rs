//! Shared-secret authentication middleware.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName},
    middleware::Next,
    response::Response,
};

use crate::AppState;
use crate::api::health::HEALTH_PATH;
use crate::credential::Credential;
use crate::error::GatewayError;

/// Paths served without authentication.
const PUBLIC_PATHS: &[&str] = &[HEALTH_PATH];

/// Checks the credential header on every proxied request.
#[derive(Debug, Clone)]
pub struct AuthGate {
    header: HeaderName,
    credential: Credential,
}

impl AuthGate {
    pub fn new(header: HeaderName, credential: Credential) -> Self {
        Self { header, credential }
    }

    /// Name of the header carrying the key.
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// Accept or reject a request by its headers.
    ///
    /// A missing header and a wrong key produce the same error, so callers
    /// cannot tell the two apart.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), GatewayError> {
        let Some(value) = headers.get(&self.header) else {
            return Err(GatewayError::Unauthorized);
        };
        // Opaque (non-visible-ASCII) values can never match.
        let candidate = value.to_str().map_err(|_| GatewayError::Unauthorized)?;
        if self.credential.verify(candidate.as_bytes()) {
            Ok(())
        } else {
            Err(GatewayError::Unauthorized)
        }
    }
}

/// Authentication middleware. Rejected requests never reach the upstream.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    let path = req.uri().path();
    if PUBLIC_PATHS.contains(&path) {
        return Ok(next.run(req).await);
    }

    if let Err(e) = state.auth.check(req.headers()) {
        tracing::warn!(
            method = %req.method(),
            path = %path,
            header_present = req.headers().contains_key(state.auth.header()),
            "Rejected request without a valid API key"
        );
        return Err(e);
    }

    Ok(next.run(req).await)
}
