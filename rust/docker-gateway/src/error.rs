//! Error types surfaced by the gateway to HTTP callers.
//!
//! Every failure that can happen while serving a request is mapped to a
//! [`GatewayError`]. Its response body is a short, generic JSON payload; the
//! detailed cause stays in the server log.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Errors produced while handling a proxied request.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Credential header missing or not matching the provisioned secret.
    #[error("Unauthorized")]
    Unauthorized,

    /// Path outside the mount prefix.
    #[error("No route for path '{0}'")]
    NotFound(String),

    /// The inbound request could not be turned into an upstream request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The control socket could not be reached.
    #[error("Failed to connect to control socket {socket}: {reason}")]
    UpstreamConnect { socket: String, reason: String },

    /// The backend did not answer within the configured bound.
    #[error("Control socket timed out after {seconds} seconds")]
    UpstreamTimeout { seconds: u64 },

    /// The exchange broke before any response byte reached the client.
    #[error("Control socket exchange failed: {0}")]
    UpstreamStream(String),
}

/// Result type alias for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// JSON error payload returned to callers.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: &'static str,
}

impl GatewayError {
    /// HTTP status this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamConnect { .. } | Self::UpstreamStream(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Static body for this error. Never contains socket paths or OS errors.
    pub fn body(&self) -> ErrorBody {
        match self {
            Self::Unauthorized => ErrorBody {
                error: "unauthorized",
                message: "Unauthorized",
            },
            Self::NotFound(_) => ErrorBody {
                error: "not_found",
                message: "No such route",
            },
            Self::InvalidRequest(_) => ErrorBody {
                error: "invalid_request",
                message: "Request could not be forwarded",
            },
            Self::UpstreamConnect { .. } => ErrorBody {
                error: "upstream_unavailable",
                message: "Error connecting to Docker Engine API",
            },
            Self::UpstreamTimeout { .. } => ErrorBody {
                error: "upstream_timeout",
                message: "Docker Engine API did not respond in time",
            },
            Self::UpstreamStream(_) => ErrorBody {
                error: "upstream_error",
                message: "Docker Engine API connection failed",
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::UpstreamConnect {
                socket: "/var/run/docker.sock".to_string(),
                reason: "No such file or directory".to_string(),
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::UpstreamTimeout { seconds: 5 }.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            GatewayError::UpstreamStream("reset".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_body_does_not_leak_details() {
        let err = GatewayError::UpstreamConnect {
            socket: "/secret/path/docker.sock".to_string(),
            reason: "Permission denied (os error 13)".to_string(),
        };
        let body = serde_json::to_string(&err.body()).unwrap();
        assert!(!body.contains("/secret/path"));
        assert!(!body.contains("os error"));

        // The log-facing message keeps the detail.
        assert!(err.to_string().contains("/secret/path/docker.sock"));
    }

    #[test]
    fn test_unauthorized_body_is_fixed() {
        let body = serde_json::to_value(GatewayError::Unauthorized.body()).unwrap();
        assert_eq!(body["error"], "unauthorized");
        assert_eq!(body["message"], "Unauthorized");
    }
}
