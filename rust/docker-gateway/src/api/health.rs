//! Liveness endpoint.

use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::AppState;

/// Served by the gateway itself, never forwarded.
pub const HEALTH_PATH: &str = "/health";

pub fn router() -> Router<AppState> {
    Router::new().route(HEALTH_PATH, get(health_check))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Reports that the listener is up. Does not touch the control socket.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
