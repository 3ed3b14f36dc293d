//! Docker Gateway - authenticated TCP front for a container engine's control socket.
//!
//! The engine only listens on a local Unix socket (a named pipe on Windows).
//! This crate exposes it over TCP behind a shared API key:
//!
//! - **Auth gate**: every proxied request must carry the key in a configured
//!   header, compared in constant time
//! - **Path rewriting**: a mount prefix (`/docker-api` by default) is stripped
//!   before the request reaches the engine
//! - **Streaming bridge**: one HTTP/1.1 connection to the socket per request,
//!   with bodies relayed in both directions as they arrive
//! - **Lifecycle**: configurable listener with graceful shutdown
//!
//! # Architecture
//!
//! - [`config`]: layered configuration and validation
//! - [`credential`]: API key generation, storage and verification
//! - [`gateway`]: auth middleware, prefix rewriting, proxy handler
//! - [`transport`]: the [`transport::Upstream`] seam and its socket implementation
//! - [`server`]: router assembly, binding and shutdown
//! - [`api`]: endpoints served by the gateway itself
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docker_gateway::{config::AppConfig, credential::Credential, server::{create_app, Gateway}};
//! use docker_gateway::transport::UnixSocketUpstream;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load_with(|_| {})?;
//!     let credential = Credential::load(&config.gateway.api_key_file)?;
//!     let upstream = Arc::new(UnixSocketUpstream::from_config(&config.upstream));
//!     let app = create_app(config.clone(), credential, upstream)?;
//!
//!     Gateway::bind(&config.server, app).await?.serve().await
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod server;
pub mod transport;

use std::sync::Arc;

use axum::http::HeaderName;

use config::{AppConfig, ConfigurationError};
use credential::Credential;
use gateway::auth::AuthGate;
use transport::Upstream;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Credential check applied to proxied requests.
    pub auth: Arc<AuthGate>,
    /// Backend that carries proxied exchanges.
    pub upstream: Arc<dyn Upstream>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        credential: Credential,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self, ConfigurationError> {
        let header = HeaderName::from_bytes(config.gateway.api_key_header.as_bytes())
            .map_err(|e| {
                ConfigurationError::invalid(
                    "gateway.api_key_header",
                    e.to_string(),
                    "Use a valid HTTP header name such as x-api-key",
                )
            })?;

        Ok(Self {
            config: Arc::new(config),
            auth: Arc::new(AuthGate::new(header, credential)),
            upstream,
        })
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("auth_header", self.auth.header())
            .field("upstream", &self.upstream)
            .finish()
    }
}
