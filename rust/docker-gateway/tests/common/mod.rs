//! Shared fixtures: a fake engine daemon on a Unix socket and a gateway in front of it.

#![allow(dead_code, reason = "each test binary uses a different subset of helpers")]

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{RawQuery, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use futures::StreamExt;
use hyper_util::rt::TokioIo;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

use docker_gateway::config::AppConfig;
use docker_gateway::credential::Credential;
use docker_gateway::server::{Gateway, ShutdownHandle, create_app};
use docker_gateway::transport::UnixSocketUpstream;

pub const API_KEY: &str = "3f9a0c1e5b7d2468ace0bdf13579abcd";

#[derive(Clone, Default)]
struct DaemonState {
    requests: Arc<AtomicUsize>,
    open_streams: Arc<AtomicUsize>,
}

/// An HTTP server on a Unix socket standing in for the container engine.
pub struct FakeDaemon {
    pub socket: PathBuf,
    state: DaemonState,
    task: JoinHandle<()>,
    _dir: TempDir,
}

impl FakeDaemon {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let state = DaemonState::default();

        let app = Router::new()
            .route("/containers/json", get(list_containers))
            .route("/containers/create", post(echo_create))
            .route("/containers/{id}/attach", post(attach))
            .route("/events", get(events))
            .route("/stall", get(stall))
            .route("/hang", get(hang))
            .route("/wait", get(wait))
            .route("/build", post(build))
            .route("/slow", get(slow))
            .route("/blob", get(blob))
            .layer(middleware::from_fn_with_state(state.clone(), count_requests))
            .with_state(state.clone());

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            socket,
            state,
            task,
            _dir: dir,
        }
    }

    /// Upstream pointing at this daemon with short test timeouts.
    pub fn upstream(&self) -> UnixSocketUpstream {
        UnixSocketUpstream::new(&self.socket).with_connect_timeout(Duration::from_secs(2))
    }

    /// Requests the daemon has received so far.
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Streaming responses the daemon is still writing.
    pub fn open_streams(&self) -> usize {
        self.state.open_streams.load(Ordering::SeqCst)
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn count_requests(State(state): State<DaemonState>, req: Request, next: Next) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    next.run(req).await
}

async fn list_containers() -> Json<serde_json::Value> {
    Json(serde_json::json!([{ "Id": "abc" }]))
}

/// Echo back what arrived so tests can check the forwarded request.
async fn echo_create(
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Json<serde_json::Value> {
    let value_of = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(serde_json::json!({
        "query": query,
        "body": String::from_utf8_lossy(&body),
        "content_type": value_of(header::CONTENT_TYPE),
        "content_length": value_of(header::CONTENT_LENGTH),
        "transfer_encoding": value_of(header::TRANSFER_ENCODING),
        "api_key": headers.get("x-api-key").and_then(|v| v.to_str().ok()),
    }))
}

/// Switch to a raw byte stream and echo everything back.
async fn attach(mut req: Request) -> Response {
    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        let Ok(upgraded) = on_upgrade.await else {
            return;
        };
        let mut io = TokioIo::new(upgraded);
        let mut buf = [0u8; 1024];
        loop {
            match io.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if io.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, "tcp")
        .body(Body::empty())
        .unwrap()
}

/// Decrements the open-stream counter when the response stream is dropped.
struct StreamGuard(Arc<AtomicUsize>);

impl StreamGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Never-ending event feed, one line every 20ms.
async fn events(State(state): State<DaemonState>) -> Body {
    let guard = StreamGuard::new(&state.open_streams);
    let stream = futures::stream::unfold((0u64, guard), |(seq, guard)| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let line = Bytes::from(format!("{{\"seq\":{seq}}}\n"));
        Some((Ok::<_, io::Error>(line), (seq + 1, guard)))
    });
    Body::from_stream(stream)
}

/// Sends one chunk, then goes silent.
async fn stall() -> Body {
    let stream = futures::stream::once(async { Ok::<_, io::Error>(Bytes::from_static(b"first")) })
        .chain(futures::stream::pending());
    Body::from_stream(stream)
}

/// Never answers.
async fn hang() -> &'static str {
    std::future::pending::<()>().await;
    "unreachable"
}

/// Never answers, and counts as an open stream until the gateway lets go.
async fn wait(State(state): State<DaemonState>) -> &'static str {
    let _guard = StreamGuard::new(&state.open_streams);
    std::future::pending::<()>().await;
    "unreachable"
}

/// Consumes the whole upload and reports its size.
async fn build(body: Bytes) -> String {
    body.len().to_string()
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_millis(300)).await;
    "done"
}

/// `blob_payload(sum)` split into chunks of the sizes given as `?sizes=a,b,c`.
async fn blob(RawQuery(query): RawQuery) -> Body {
    let sizes: Vec<usize> = query
        .as_deref()
        .and_then(|q| q.strip_prefix("sizes="))
        .map(|list| list.split(',').filter_map(|n| n.parse().ok()).collect())
        .unwrap_or_default();

    let payload = blob_payload(sizes.iter().sum());
    let mut chunks = Vec::with_capacity(sizes.len());
    let mut offset = 0;
    for size in sizes {
        chunks.push(Ok::<_, io::Error>(payload.slice(offset..offset + size)));
        offset += size;
    }

    let stream = futures::stream::iter(chunks).then(|chunk| async move {
        tokio::task::yield_now().await;
        chunk
    });
    Body::from_stream(stream)
}

/// Deterministic test payload of `len` bytes.
pub fn blob_payload(len: usize) -> Bytes {
    (0..len)
        .map(|i| u8::try_from(i % 251).unwrap())
        .collect::<Vec<u8>>()
        .into()
}

/// A socket whose peer reads part of each request and hangs up without answering.
pub struct HangupDaemon {
    pub socket: PathBuf,
    task: JoinHandle<()>,
    _dir: TempDir,
}

impl HangupDaemon {
    pub async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        let task = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 64];
                let _ = stream.read(&mut buf).await;
                drop(stream);
            }
        });

        Self {
            socket,
            task,
            _dir: dir,
        }
    }

    pub fn upstream(&self) -> UnixSocketUpstream {
        UnixSocketUpstream::new(&self.socket).with_connect_timeout(Duration::from_secs(2))
    }
}

impl Drop for HangupDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A running gateway bound to an ephemeral local port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub shutdown: ShutdownHandle,
    pub task: JoinHandle<anyhow::Result<()>>,
}

impl TestGateway {
    pub async fn start(upstream: UnixSocketUpstream) -> Self {
        let mut config = AppConfig::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.server.shutdown_grace_secs = 2;

        let app = create_app(config.clone(), Credential::new(API_KEY), Arc::new(upstream)).unwrap();
        let gateway = Gateway::bind(&config.server, app).await.unwrap();
        let addr = gateway.local_addr().unwrap();
        let shutdown = gateway.shutdown_handle();
        let task = tokio::spawn(gateway.serve());

        Self {
            addr,
            shutdown,
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
