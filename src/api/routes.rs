//! Router assembly.

use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::timeout::RequestBodyTimeoutLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::hardening;
use super::state::AppState;

/// Request bodies on the dispatch endpoint are capped at 1 MiB.
pub const MAX_BODY_BYTES: usize = 1 << 20;

/// A stalled request body upload is aborted after this long. Response
/// streaming is unaffected.
pub const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the gateway router.
///
/// Layer order matters: path hardening wraps the router so it runs before
/// route matching, defeating any router-level path normalization.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/mcp/tools", get(handlers::list_tools))
        .route("/mcp/{tool}", post(handlers::dispatch_tool))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(RequestBodyTimeoutLayer::new(REQUEST_READ_TIMEOUT))
        .layer(middleware::from_fn(hardening::request_context))
        .layer(middleware::from_fn(hardening::harden_paths))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
