//! Catch-all handler that relays authenticated requests to the control socket.

use axum::{
    body::Body,
    extract::{Request, State},
    http::Uri,
    response::Response,
};

use super::rewrite::rewrite_path_and_query;
use crate::AppState;
use crate::error::GatewayError;

/// Rewrite the request target and hand the exchange to the upstream.
///
/// Method, headers and body pass through untouched. Paths outside the mount
/// prefix are answered with 404 without contacting the backend.
pub async fn proxy_handler(
    State(state): State<AppState>,
    mut req: Request<Body>,
) -> Result<Response, GatewayError> {
    let prefix = state.config.gateway.mount_prefix.as_str();
    let uri = req.uri();
    let Some(target) = rewrite_path_and_query(prefix, uri.path(), uri.query()) else {
        tracing::debug!(path = %uri.path(), "Path outside mount prefix");
        return Err(GatewayError::NotFound(uri.path().to_string()));
    };

    *req.uri_mut() = target
        .parse::<Uri>()
        .map_err(|e| GatewayError::InvalidRequest(format!("bad target {target:?}: {e}")))?;

    state.upstream.forward(req).await
}
