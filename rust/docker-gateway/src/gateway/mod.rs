//! Request path from the public listener to the upstream.
//!
//! - [`auth`]: shared-secret check in front of every proxied route
//! - [`rewrite`]: mount-prefix stripping
//! - [`proxy`]: catch-all handler that forwards to the upstream

pub mod auth;
pub mod proxy;
pub mod rewrite;

use axum::Router;

use crate::AppState;

/// Router that relays every path it does not otherwise know.
pub fn create_router() -> Router<AppState> {
    Router::new().fallback(proxy::proxy_handler)
}
