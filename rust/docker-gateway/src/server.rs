//! HTTP server setup, middleware and lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::{AppConfig, ServerConfig};
use crate::credential::Credential;
use crate::logging::OpTimer;
use crate::transport::Upstream;
use crate::{AppState, api, gateway};
use crate::{log_banner, log_init_step, log_init_warning, log_success};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Assemble the router: health endpoint, auth gate, proxy fallback.
///
/// Nothing here touches the network; the upstream is only contacted when a
/// request is forwarded.
pub fn create_app(
    config: AppConfig,
    credential: Credential,
    upstream: Arc<dyn Upstream>,
) -> anyhow::Result<Router> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(
        format!("🐳 Docker Gateway v{VERSION}"),
        format!(
            "Mount: {} | Listen: {}",
            config.gateway.mount_prefix,
            config.server.bind_address()
        )
    );

    // [1/3] Auth gate
    let step_timer = OpTimer::new("server", "auth");
    let max_connections = config.server.max_connections;
    let socket_path = config.upstream.socket_path.clone();
    let state = AppState::new(config, credential, upstream)?;
    log_init_step!(
        1,
        3,
        "Auth",
        format!("🔑 API key required in '{}'", state.auth.header())
    );
    step_timer.finish();

    // [2/3] Upstream
    let step_timer = OpTimer::new("server", "upstream");
    log_init_step!(2, 3, "Upstream", format!("🔌 {}", socket_path.display()));
    if cfg!(unix) && !socket_path.exists() {
        log_init_warning!(
            "Control socket {} does not exist yet. Requests will fail with 502 until it does.",
            socket_path.display()
        );
    }
    step_timer.finish();

    // [3/3] Router
    let step_timer = OpTimer::new("server", "router");
    let app = Router::new()
        .merge(api::create_router())
        .merge(gateway::create_router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            gateway::auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(GlobalConcurrencyLimitLayer::new(max_connections))
        .with_state(state);
    log_init_step!(
        3,
        3,
        "Router",
        format!("🌐 Routes + middleware configured (max {max_connections} in flight)")
    );
    step_timer.finish();

    overall_timer.finish();
    log_success!("Docker Gateway created successfully");

    Ok(app)
}

/// Triggers graceful shutdown of a running [`Gateway`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle(CancellationToken);

impl ShutdownHandle {
    /// Stop accepting connections and start draining in-flight requests.
    pub fn shutdown(&self) {
        self.0.cancel();
    }
}

/// A bound listener ready to serve the gateway router.
#[derive(Debug)]
pub struct Gateway {
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
    grace: Duration,
}

impl Gateway {
    /// Bind the public listener. Port 0 picks a free port.
    pub async fn bind(config: &ServerConfig, app: Router) -> anyhow::Result<Self> {
        let addr = config.bind_address();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        Ok(Self {
            listener,
            app,
            shutdown: CancellationToken::new(),
            grace: config.shutdown_grace(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    /// Serve until shutdown is requested and in-flight exchanges drain.
    ///
    /// Exchanges still running when the grace period ends are dropped.
    pub async fn serve(self) -> anyhow::Result<()> {
        let Self {
            listener,
            app,
            shutdown,
            grace,
        } = self;

        let addr = listener.local_addr()?;
        tracing::info!(%addr, "Listening");

        let signal = shutdown.clone();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        tokio::select! {
            joined = &mut server => {
                joined.context("Server task panicked")?.context("Server error")?;
                return Ok(());
            }
            () = shutdown.cancelled() => {}
        }

        tracing::info!(
            grace_secs = grace.as_secs(),
            "Shutdown requested, draining in-flight requests"
        );
        match tokio::time::timeout(grace, &mut server).await {
            Ok(joined) => {
                joined.context("Server task panicked")?.context("Server error")?;
                tracing::info!("Server shut down gracefully");
            }
            Err(_elapsed) => {
                server.abort();
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "Grace period elapsed, dropping remaining connections"
                );
            }
        }
        Ok(())
    }
}
