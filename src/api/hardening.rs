//! Pre-routing request hardening and request identity.
//!
//! Both middlewares wrap the router, so they see the request path exactly as
//! the peer sent it, before any route matching or parameter decoding.

use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::observability;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id resolved by [`request_context`], available to handlers via
/// request extensions.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Reject dot-segment traversal within the tool namespace before routing.
///
/// Routers that normalize paths can turn `/mcp/../evil` into a redirect;
/// rejecting here guarantees a 400 instead.
pub async fn harden_paths(req: Request, next: Next) -> Response {
    let raw = req.uri().path();
    if raw.starts_with("/mcp") {
        let decoded = urlencoding::decode(raw)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        if has_dot_segments(&decoded) || has_encoded_dot_segments(raw) {
            return (StatusCode::BAD_REQUEST, "invalid path\n").into_response();
        }
    }
    next.run(req).await
}

fn has_dot_segments(path: &str) -> bool {
    path.contains("/../")
        || path.ends_with("/..")
        || path.contains("/./")
        || path.ends_with("/.")
}

fn has_encoded_dot_segments(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.contains("%2e%2e") || lower.contains("%2e/") || lower.contains("/%2e")
}

/// Resolve the request id (incoming header wins, otherwise generated), stash
/// it for handlers, and echo it on the response.
pub async fn request_context(mut req: Request, next: Next) -> Response {
    let incoming = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok());
    let rid = observability::request_id(incoming);

    req.extensions_mut().insert(RequestId(rid.clone()));
    let mut res = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&rid) {
        res.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_dot_segments_are_caught() {
        assert!(has_dot_segments("/mcp/../evil"));
        assert!(has_dot_segments("/mcp/.."));
        assert!(has_dot_segments("/mcp/./x"));
        assert!(has_dot_segments("/mcp/."));
        assert!(!has_dot_segments("/mcp/echo"));
        assert!(!has_dot_segments("/mcp/my.tool"));
    }

    #[test]
    fn encoded_dot_segments_are_caught_any_case() {
        assert!(has_encoded_dot_segments("/mcp/%2e%2e/evil"));
        assert!(has_encoded_dot_segments("/mcp/%2E%2E/evil"));
        assert!(has_encoded_dot_segments("/mcp/%2e/x"));
        assert!(has_encoded_dot_segments("/mcp/x/%2e"));
        assert!(!has_encoded_dot_segments("/mcp/echo"));
    }
}
