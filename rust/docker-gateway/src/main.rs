//! Docker Gateway - Main Entry Point
//!
//! Exposes the local container engine socket over TCP behind an API key.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

use docker_gateway::config::AppConfig;
use docker_gateway::credential::Credential;
use docker_gateway::logging::init_tracing;
use docker_gateway::server::{Gateway, ShutdownHandle, create_app};
use docker_gateway::transport::UnixSocketUpstream;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Command-line arguments. Flags override config files and environment.
#[derive(Parser, Debug)]
#[command(name = "docker-gateway")]
#[command(about = "Authenticated TCP gateway for the Docker Engine API socket")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Host to bind to.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Path of the engine control socket.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// File holding the API key.
    #[arg(long, global = true)]
    api_key_file: Option<PathBuf>,

    /// Log level (ignored when RUST_LOG is set).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway (default).
    Serve,
    /// Generate a new API key, store it and print it once.
    Keygen {
        /// Where to write the key (defaults to the configured key file).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Replace an existing key file.
        #[arg(long)]
        force: bool,
    },
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(socket) = &self.socket {
            config.upstream.socket_path.clone_from(socket);
        }
        if let Some(path) = &self.api_key_file {
            config.gateway.api_key_file.clone_from(path);
        }
        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if self.log_json {
            config.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::load_with(|config| args.apply(config))?;

    init_tracing(&config.logging)?;

    match args.command {
        Some(Command::Keygen { output, force }) => keygen(&config, output, force),
        Some(Command::Serve) | None => serve(config).await,
    }
}

fn keygen(config: &AppConfig, output: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = output.unwrap_or_else(|| config.gateway.api_key_file.clone());
    let credential = Credential::generate();
    credential.persist(&path, force)?;

    tracing::info!(path = %path.display(), "API key written");
    // Shown once; only the file keeps it afterwards.
    println!("{}", credential.expose());
    Ok(())
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!("Starting Docker Gateway v{}", env!("CARGO_PKG_VERSION"));

    // The gateway never starts without a key.
    let credential = Credential::load(&config.gateway.api_key_file).with_context(|| {
        format!(
            "Cannot start without an API key; run `docker-gateway keygen` to create {}",
            config.gateway.api_key_file.display()
        )
    })?;

    let upstream = Arc::new(UnixSocketUpstream::from_config(&config.upstream));
    let app = create_app(config.clone(), credential, upstream)?;
    let gateway = Gateway::bind(&config.server, app).await?;

    tokio::spawn(shutdown_signal(gateway.shutdown_handle()));
    gateway.serve().await
}

/// Trigger graceful shutdown on Ctrl+C or SIGTERM.
async fn shutdown_signal(handle: ShutdownHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }

    handle.shutdown();
}
