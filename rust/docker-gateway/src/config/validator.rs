//! Startup validation of the loaded configuration.
//!
//! All checks run and every problem is reported at once, so an operator can
//! fix a broken deployment in one pass.

use axum::http::HeaderName;

use crate::api::health::HEALTH_PATH;

use super::error::{ConfigResult, ConfigurationError};
use super::{AppConfig, GatewayConfig, ServerConfig, UpstreamConfig};

/// Configuration validator.
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();
        errors.extend(Self::check_server(&config.server));
        errors.extend(Self::check_gateway(&config.gateway));
        errors.extend(Self::check_upstream(&config.upstream));
        ConfigurationError::from_list(errors)
    }

    fn check_server(server: &ServerConfig) -> Vec<ConfigurationError> {
        let mut errors = Vec::new();
        if server.port == 0 {
            errors.push(ConfigurationError::invalid(
                "server.port",
                "port 0 is not a fixed listening port",
                "Set PORT to the TCP port the gateway should listen on (default 3000)",
            ));
        }
        if server.max_connections == 0 {
            errors.push(ConfigurationError::invalid(
                "server.max_connections",
                "must allow at least one request",
                "Set DOCKER_GATEWAY__SERVER__MAX_CONNECTIONS to a positive number",
            ));
        }
        errors
    }

    fn check_gateway(gateway: &GatewayConfig) -> Vec<ConfigurationError> {
        let mut errors = Vec::new();
        let prefix = gateway.mount_prefix.as_str();

        if !prefix.starts_with('/') {
            errors.push(ConfigurationError::invalid(
                "gateway.mount_prefix",
                format!("'{prefix}' does not start with '/'"),
                "Use an absolute path prefix such as /docker-api",
            ));
        } else if prefix == "/" || prefix.ends_with('/') {
            errors.push(ConfigurationError::invalid(
                "gateway.mount_prefix",
                format!("'{prefix}' must not end with '/'"),
                "Drop the trailing slash, e.g. /docker-api",
            ));
        } else if prefix == HEALTH_PATH {
            errors.push(ConfigurationError::invalid(
                "gateway.mount_prefix",
                format!("'{prefix}' is the unauthenticated health endpoint"),
                "Pick a prefix that does not collide with /health, e.g. /docker-api",
            ));
        }

        if HeaderName::from_bytes(gateway.api_key_header.as_bytes()).is_err() {
            errors.push(ConfigurationError::invalid(
                "gateway.api_key_header",
                format!("'{}' is not a valid HTTP header name", gateway.api_key_header),
                "Use a token such as x-api-key",
            ));
        }

        if gateway.api_key_file.as_os_str().is_empty() {
            errors.push(ConfigurationError::missing_required(
                "gateway.api_key_file",
                "API_KEY_FILE",
            ));
        }
        errors
    }

    fn check_upstream(upstream: &UpstreamConfig) -> Vec<ConfigurationError> {
        let mut errors = Vec::new();
        if upstream.socket_path.as_os_str().is_empty() {
            errors.push(ConfigurationError::missing_required(
                "upstream.socket_path",
                "DOCKER_SOCKET",
            ));
        }
        if upstream.connect_timeout_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "upstream.connect_timeout_secs",
                "must be at least 1 second",
                "Set DOCKER_GATEWAY__UPSTREAM__CONNECT_TIMEOUT_SECS",
            ));
        }
        if upstream.idle_timeout_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "upstream.idle_timeout_secs",
                "a hung backend must not hold connections forever",
                "Set DOCKER_GATEWAY__UPSTREAM__IDLE_TIMEOUT_SECS to a positive number",
            ));
        }
        errors
    }
}
