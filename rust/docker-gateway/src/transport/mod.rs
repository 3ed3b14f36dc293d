//! Transport bridge between the public listener and the control socket.
//!
//! The [`Upstream`] trait is the seam between request handling and the wire.
//! [`UnixSocketUpstream`] is the production implementation: one fresh
//! HTTP/1.1 connection per exchange, never pooled, never retried once a
//! request has been written.

pub mod body;
pub mod unix;

use std::fmt;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};

use crate::error::GatewayResult;

pub use body::{ConnectionGuard, UpstreamBody};
pub use unix::UnixSocketUpstream;

/// A backend that can carry one HTTP exchange.
///
/// The request URI is already rewritten to origin form (`/path?query`).
#[async_trait]
pub trait Upstream: Send + Sync + fmt::Debug {
    /// Forward `req` and return the backend response with a streaming body.
    async fn forward(&self, req: Request<Body>) -> GatewayResult<Response<Body>>;
}
