//! Bodies streamed between the client and the control socket.
//!
//! [`RequestBody`] records when the client last sent request bytes, so the
//! wait for the response head can be bounded by silence rather than by the
//! total upload time.
//!
//! [`UpstreamBody`] hands response frames to the client as soon as the
//! backend produces them. It adds two things on top of hyper's `Incoming`:
//!
//! - an idle deadline, reset on every frame, so a backend that stops talking
//!   mid-response cannot pin the client connection forever;
//! - ownership of the upstream connection task, which is aborted when the body
//!   is dropped. Dropping happens when the stream is drained, when it fails,
//!   and when the client goes away, so the socket is released on every path.
//!
//! Once the response head has been sent, a failure can only be signalled by
//! cutting the client connection; HTTP has no way to replace a 200 that is
//! already streaming. Such truncations are logged at `warn`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use tokio::task::AbortHandle;
use tokio::time::{Instant, Sleep, sleep};

/// Boxed error type accepted by axum bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Aborts the upstream connection task when dropped.
#[derive(Debug)]
pub struct ConnectionGuard(Option<AbortHandle>);

impl ConnectionGuard {
    pub fn new(handle: AbortHandle) -> Self {
        Self(Some(handle))
    }

    /// Let the connection task run to completion on its own.
    pub fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

pin_project! {
    /// Response body streamed from the control socket.
    #[derive(Debug)]
    pub struct UpstreamBody<B> {
        #[pin]
        inner: B,
        #[pin]
        idle: Sleep,
        idle_timeout: Duration,
        bytes_relayed: u64,
        path: String,
        finished: bool,
        _guard: Option<ConnectionGuard>,
    }

    impl<B> PinnedDrop for UpstreamBody<B> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if !*this.finished {
                tracing::debug!(
                    path = %this.path,
                    bytes_relayed = *this.bytes_relayed,
                    "Client went away before the response completed"
                );
            }
        }
    }
}

impl<B: Body> UpstreamBody<B> {
    pub fn new(
        inner: B,
        idle_timeout: Duration,
        path: impl Into<String>,
        guard: Option<ConnectionGuard>,
    ) -> Self {
        Self {
            finished: inner.is_end_stream(),
            inner,
            idle: sleep(idle_timeout),
            idle_timeout,
            bytes_relayed: 0,
            path: path.into(),
            _guard: guard,
        }
    }
}

impl<B> Body for UpstreamBody<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        match this.inner.as_mut().poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    *this.bytes_relayed += data.len() as u64;
                }
                this.idle.as_mut().reset(Instant::now() + *this.idle_timeout);
                if this.inner.is_end_stream() {
                    *this.finished = true;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                let e: BoxError = e.into();
                *this.finished = true;
                tracing::warn!(
                    path = %this.path,
                    bytes_relayed = *this.bytes_relayed,
                    error = %e,
                    "Control socket stream failed, response truncated"
                );
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                *this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => {
                if this.idle.as_mut().poll(cx).is_ready() {
                    *this.finished = true;
                    tracing::warn!(
                        path = %this.path,
                        bytes_relayed = *this.bytes_relayed,
                        idle_timeout_secs = this.idle_timeout.as_secs(),
                        "Control socket went idle, response truncated"
                    );
                    return Poll::Ready(Some(Err(Box::new(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no data from control socket for {:?}", this.idle_timeout),
                    )))));
                }
                Poll::Pending
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Time of the most recent request-body progress, shared between the body
/// being uploaded and the task waiting for the response head.
#[derive(Debug, Clone)]
pub struct Activity {
    origin: Instant,
    last_ms: Arc<AtomicU64>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record progress now.
    pub fn touch(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// When progress was last recorded.
    pub fn last(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

pin_project! {
    /// Request body on its way to the control socket.
    #[derive(Debug)]
    pub struct RequestBody<B> {
        #[pin]
        inner: B,
        activity: Activity,
    }
}

impl<B> RequestBody<B> {
    pub fn new(inner: B, activity: Activity) -> Self {
        Self { inner, activity }
    }
}

impl<B> Body for RequestBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let polled = this.inner.poll_frame(cx);
        if let Poll::Ready(Some(Ok(_)) | None) = &polled {
            this.activity.touch();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
