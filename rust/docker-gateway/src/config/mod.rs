//! Configuration management for the Docker gateway.
//!
//! Configuration is assembled from several layers, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. Optional config files (`config/docker-gateway.{toml,yaml,json}`)
//! 3. `DOCKER_GATEWAY__*` environment variables (`__` separates sections)
//! 4. The flat legacy variables `PORT`, `DOCKER_SOCKET` and `API_KEY_FILE`
//!
//! Command-line flags are applied on top by the binary. A `.env` file in the
//! working directory is loaded before any environment lookups.
//!
//! ```rust,ignore
//! use docker_gateway::config::AppConfig;
//!
//! let config = AppConfig::load_with(|_| {})?;
//! println!("proxying {} on port {}", config.gateway.mount_prefix, config.server.port);
//! ```

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Public TCP listener.
    #[serde(default)]
    pub server: ServerConfig,
    /// Mount prefix and authentication.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Control socket connection.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from files and environment, apply `overrides`
    /// (command-line flags) on top, then validate the result.
    pub fn load_with(overrides: impl FnOnce(&mut Self)) -> anyhow::Result<Self> {
        let mut config = Self::load_unchecked()?;
        overrides(&mut config);

        ConfigValidator::validate(&config)
            .map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;

        Ok(config)
    }

    /// Load configuration without validation.
    pub fn load_unchecked() -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/docker-gateway").required(false))
            .add_source(
                config::Environment::with_prefix("DOCKER_GATEWAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize()?;

        // Flat variables kept for compatibility with existing deployments
        if let Ok(port) = std::env::var("PORT") {
            app_config.server.port = port
                .parse()
                .map_err(|e| anyhow::anyhow!("PORT must be a port number, got '{port}': {e}"))?;
        }
        if let Ok(socket) = std::env::var("DOCKER_SOCKET") {
            app_config.upstream.socket_path = PathBuf::from(socket);
        }
        if let Ok(path) = std::env::var("API_KEY_FILE") {
            app_config.gateway.api_key_file = PathBuf::from(path);
        }

        Ok(app_config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Public port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum requests served concurrently.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How long in-flight exchanges may run after shutdown is requested.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> usize {
    1024
}

fn default_shutdown_grace() -> u64 {
    30
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Path prefix under which requests are proxied.
    #[serde(default = "default_mount_prefix")]
    pub mount_prefix: String,
    /// Header carrying the shared secret.
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// File holding the shared secret.
    #[serde(default = "default_api_key_file")]
    pub api_key_file: PathBuf,
}

fn default_mount_prefix() -> String {
    "/docker-api".to_string()
}

fn default_api_key_header() -> String {
    "x-api-key".to_string()
}

fn default_api_key_file() -> PathBuf {
    PathBuf::from("api-key.txt")
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            mount_prefix: default_mount_prefix(),
            api_key_header: default_api_key_header(),
            api_key_file: default_api_key_file(),
        }
    }
}

/// Control socket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Filesystem path of the control socket (named pipe on Windows).
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Bound on establishing the socket connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Bound on silence from the backend, both before and during the response.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Extra connect attempts after a failed connect. Requests are never resent.
    #[serde(default)]
    pub connect_retries: u32,
}

/// Platform default location of the Docker engine socket.
pub fn default_socket_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"\\.\pipe\docker_engine")
    } else {
        PathBuf::from("/var/run/docker.sock")
    }
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    300
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            connect_retries: 0,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to use JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
