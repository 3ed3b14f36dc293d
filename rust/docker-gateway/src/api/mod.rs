//! Endpoints served by the gateway itself.

pub mod health;

use axum::Router;

use crate::AppState;

/// Create the API router.
pub fn create_router() -> Router<AppState> {
    Router::new().merge(health::router())
}
