//! HTTP/1.1 over the engine's control socket.
//!
//! Each call to [`Upstream::forward`] opens its own socket connection, runs a
//! single request/response exchange on it and lets it go. Bodies are
//! streamed in both directions; hyper keeps content-length and chunked
//! framing consistent with the headers it is given.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Version, header};
use hyper::client::conn::http1;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::time::Instant;

use super::Upstream;
use super::body::{Activity, ConnectionGuard, RequestBody, UpstreamBody};
use crate::config::UpstreamConfig;
use crate::error::{GatewayError, GatewayResult};

#[cfg(unix)]
type SocketStream = tokio::net::UnixStream;
#[cfg(windows)]
type SocketStream = tokio::net::windows::named_pipe::NamedPipeClient;

/// Pause between connect attempts, multiplied by the attempt number.
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

#[cfg(unix)]
async fn open_socket(path: &Path) -> io::Result<SocketStream> {
    tokio::net::UnixStream::connect(path).await
}

#[cfg(windows)]
async fn open_socket(path: &Path) -> io::Result<SocketStream> {
    tokio::net::windows::named_pipe::ClientOptions::new().open(path)
}

/// Upstream reached through a filesystem-addressed stream socket.
#[derive(Debug, Clone)]
pub struct UnixSocketUpstream {
    socket_path: PathBuf,
    connect_timeout: Duration,
    idle_timeout: Duration,
    connect_retries: u32,
}

impl UnixSocketUpstream {
    /// Upstream at `socket_path` with default timeouts.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        let defaults = UpstreamConfig::default();
        Self {
            socket_path: socket_path.into(),
            connect_timeout: defaults.connect_timeout(),
            idle_timeout: defaults.idle_timeout(),
            connect_retries: defaults.connect_retries,
        }
    }

    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            socket_path: config.socket_path.clone(),
            connect_timeout: config.connect_timeout(),
            idle_timeout: config.idle_timeout(),
            connect_retries: config.connect_retries,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries;
        self
    }

    /// Wait for the response head.
    ///
    /// The clock runs from the last request-body progress, so a slow but
    /// steady upload never times out; only silence longer than the idle
    /// timeout does.
    async fn await_head<F: Future>(
        &self,
        exchange: F,
        activity: &Activity,
    ) -> GatewayResult<F::Output> {
        let mut exchange = std::pin::pin!(exchange);
        loop {
            let deadline = activity.last() + self.idle_timeout;
            tokio::select! {
                output = &mut exchange => return Ok(output),
                () = tokio::time::sleep_until(deadline) => {
                    if activity.last() + self.idle_timeout <= Instant::now() {
                        return Err(GatewayError::UpstreamTimeout {
                            seconds: self.idle_timeout.as_secs(),
                        });
                    }
                }
            }
        }
    }

    /// Open a connection, retrying only the connect step.
    async fn connect(&self) -> GatewayResult<TokioIo<SocketStream>> {
        let mut attempt = 0u32;
        loop {
            let failure =
                match tokio::time::timeout(self.connect_timeout, open_socket(&self.socket_path))
                    .await
                {
                    Ok(Ok(stream)) => return Ok(TokioIo::new(stream)),
                    Ok(Err(e)) => e.to_string(),
                    Err(_elapsed) => {
                        format!("connect timed out after {:?}", self.connect_timeout)
                    }
                };

            if attempt >= self.connect_retries {
                tracing::warn!(
                    socket = %self.socket_path.display(),
                    attempts = attempt + 1,
                    error = %failure,
                    "Cannot reach control socket"
                );
                return Err(GatewayError::UpstreamConnect {
                    socket: self.socket_path.display().to_string(),
                    reason: failure,
                });
            }

            attempt += 1;
            tracing::debug!(
                socket = %self.socket_path.display(),
                attempt,
                error = %failure,
                "Control socket connect failed, retrying"
            );
            tokio::time::sleep(CONNECT_BACKOFF * attempt).await;
        }
    }
}

#[async_trait]
impl Upstream for UnixSocketUpstream {
    async fn forward(&self, mut req: Request<Body>) -> GatewayResult<Response<Body>> {
        let path = req.uri().path().to_string();
        let upgrade = wants_upgrade(req.headers());
        let client_upgrade = upgrade.then(|| hyper::upgrade::on(&mut req));
        prepare_request(&mut req, upgrade);

        let activity = Activity::new();
        let req = req.map(|body| Body::new(RequestBody::new(body, activity.clone())));

        tracing::debug!(
            method = %req.method(),
            path = %path,
            upgrade,
            "Forwarding to control socket"
        );

        let io = self.connect().await?;
        let (mut sender, conn) = http1::handshake::<_, Body>(io)
            .await
            .map_err(|e| GatewayError::UpstreamStream(format!("handshake failed: {e}")))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!(error = %e, "Control socket connection ended");
            }
        });
        let guard = ConnectionGuard::new(driver.abort_handle());

        sender
            .ready()
            .await
            .map_err(|e| GatewayError::UpstreamStream(format!("connection not ready: {e}")))?;

        activity.touch();
        let mut response = match self.await_head(sender.send_request(req), &activity).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(path = %path, error = %e, "Control socket exchange failed");
                return Err(GatewayError::UpstreamStream(e.to_string()));
            }
            Err(timeout) => {
                tracing::warn!(
                    path = %path,
                    idle_timeout_secs = self.idle_timeout.as_secs(),
                    "Control socket did not answer"
                );
                return Err(timeout);
            }
        };

        if response.status() == StatusCode::SWITCHING_PROTOCOLS {
            if let Some(client_upgrade) = client_upgrade {
                let upstream_upgrade = hyper::upgrade::on(&mut response);
                // The driver hands the socket over to the upgrade; it must outlive this call.
                guard.disarm();
                tokio::spawn(bridge_upgraded(client_upgrade, upstream_upgrade, path));
                let (parts, _) = response.into_parts();
                return Ok(Response::from_parts(parts, Body::empty()));
            }
        }

        let (mut parts, incoming) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        let body = UpstreamBody::new(incoming, self.idle_timeout, path, Some(guard));
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Whether the client asked to switch protocols (Docker attach/exec).
fn wants_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key(header::UPGRADE)
        || headers
            .get(header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().contains("upgrade"))
}

/// Adjust the request head where the one-shot socket connection requires it.
fn prepare_request(req: &mut Request<Body>, upgrade: bool) {
    *req.version_mut() = Version::HTTP_11;

    let headers = req.headers_mut();
    // The expectation was already answered on the client side.
    headers.remove(header::EXPECT);
    if !headers.contains_key(header::HOST) {
        headers.insert(header::HOST, HeaderValue::from_static("localhost"));
    }
    if !upgrade {
        headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
        headers.remove("keep-alive");
    }
}

/// Drop connection-scoped headers the backend set for its own socket.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    headers.remove(header::CONNECTION);
    headers.remove("keep-alive");
}

async fn bridge_upgraded(client: OnUpgrade, upstream: OnUpgrade, path: String) {
    let (client_io, upstream_io) = match tokio::try_join!(client, upstream) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "Upgrade bridging setup failed");
            return;
        }
    };

    let mut client_io = TokioIo::new(client_io);
    let mut upstream_io = TokioIo::new(upstream_io);
    match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
        Ok((to_upstream, to_client)) => {
            tracing::debug!(path = %path, to_upstream, to_client, "Upgraded stream closed");
        }
        Err(e) => {
            tracing::debug!(path = %path, error = %e, "Upgraded stream ended with error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(headers: &[(&'static str, &'static str)]) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/containers/create");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_wants_upgrade() {
        assert!(wants_upgrade(request(&[("upgrade", "tcp")]).headers()));
        assert!(wants_upgrade(
            request(&[("connection", "Upgrade")]).headers()
        ));
        assert!(!wants_upgrade(
            request(&[("connection", "keep-alive")]).headers()
        ));
    }

    #[test]
    fn test_prepare_request_keeps_client_headers() {
        let mut req = request(&[
            ("host", "gateway.example:3000"),
            ("content-type", "application/json"),
            ("x-api-key", "k"),
            ("x-registry-auth", "abc"),
            ("x-registry-auth", "def"),
            ("connection", "keep-alive"),
            ("keep-alive", "timeout=5"),
            ("expect", "100-continue"),
        ]);
        prepare_request(&mut req, false);

        let headers = req.headers();
        assert_eq!(headers[header::HOST], "gateway.example:3000");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers["x-api-key"], "k");
        assert_eq!(headers.get_all("x-registry-auth").iter().count(), 2);
        assert_eq!(headers[header::CONNECTION], "close");
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get(header::EXPECT).is_none());
        assert_eq!(req.version(), Version::HTTP_11);
    }

    #[test]
    fn test_prepare_request_defaults_host() {
        let mut req = request(&[]);
        prepare_request(&mut req, false);
        assert_eq!(req.headers()[header::HOST], "localhost");
    }

    #[test]
    fn test_prepare_upgrade_request_keeps_connection() {
        let mut req = request(&[("connection", "Upgrade"), ("upgrade", "tcp")]);
        prepare_request(&mut req, true);
        assert_eq!(req.headers()[header::CONNECTION], "Upgrade");
        assert_eq!(req.headers()[header::UPGRADE], "tcp");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_socket_is_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = UnixSocketUpstream::new(dir.path().join("missing.sock"))
            .with_connect_timeout(Duration::from_secs(1))
            .with_connect_retries(2);

        let req = Request::builder()
            .uri("/containers/json")
            .body(Body::empty())
            .unwrap();
        let started = std::time::Instant::now();
        let err = upstream.forward(req).await.unwrap_err();

        assert!(matches!(err, GatewayError::UpstreamConnect { .. }));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        // Two retries with linear backoff: 100ms + 200ms.
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_head_wait_tolerates_steady_upload() {
        let upstream = UnixSocketUpstream::new("/unused.sock")
            .with_idle_timeout(Duration::from_millis(200));
        let activity = Activity::new();
        activity.touch();

        let uploader = activity.clone();
        let exchange = async move {
            // 480ms in total, never silent for more than 80ms.
            for _ in 0..6 {
                tokio::time::sleep(Duration::from_millis(80)).await;
                uploader.touch();
            }
            "head"
        };

        assert_eq!(upstream.await_head(exchange, &activity).await.unwrap(), "head");
    }

    #[tokio::test]
    async fn test_head_wait_times_out_on_silence() {
        let upstream = UnixSocketUpstream::new("/unused.sock")
            .with_idle_timeout(Duration::from_millis(100));
        let activity = Activity::new();
        activity.touch();

        let err = upstream
            .await_head(std::future::pending::<()>(), &activity)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamTimeout { .. }));
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }
}
