//! HTTP handlers: health, readiness, tool listing, and the streaming
//! dispatch endpoint.

use std::time::Duration;

use axum::Extension;
use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use futures::{StreamExt, stream};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use super::hardening::RequestId;
use super::sse::{self, SseSink};
use super::state::AppState;
use crate::config::RuntimeKind;
use crate::runtime::docker_ready;
use crate::service::GatewayError;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok\n")
}

pub async fn readyz(State(state): State<AppState>) -> Response {
    let tools = state.service.list_tools();
    let needs_container = tools.iter().any(|t| t.runtime == RuntimeKind::Container);

    // The container CLI is probed only when the catalog actually uses it.
    if needs_container {
        if let Err(err) = docker_ready().await {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "ready": false,
                    "reason": "docker_unavailable",
                    "error": err.to_string(),
                    "runtimes": { "native": true, "container": false },
                })),
            )
                .into_response();
        }
    }

    let runtimes = if needs_container {
        serde_json::json!({ "native": true, "container": true })
    } else {
        serde_json::json!({ "native": true })
    };

    Json(serde_json::json!({
        "ready": true,
        "config_loaded": true,
        "tools": tools.len(),
        "runtimes": runtimes,
    }))
    .into_response()
}

pub async fn list_tools(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({ "tools": state.service.list_tools() })).into_response()
}

/// `POST /mcp/{tool}`: run the tool and stream its output as SSE.
///
/// Errors before the first event surface as HTTP statuses; once an event has
/// been written the status is committed and a single terminal `error` event
/// is the only remaining error surface.
pub async fn dispatch_tool(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json_content_type(&headers) {
        return (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported media type\n").into_response();
    }

    if crate::sandbox::validate_tool_name(&tool_name).is_err() {
        return (StatusCode::BAD_REQUEST, "invalid tool name\n").into_response();
    }

    let trimmed = body.as_ref().trim_ascii();
    let input: Vec<u8> = if trimmed.is_empty() {
        b"{}".to_vec()
    } else {
        trimmed.to_vec()
    };
    if serde_json::from_slice::<serde::de::IgnoredAny>(&input).is_err() {
        return (StatusCode::BAD_REQUEST, "body must be valid JSON\n").into_response();
    }

    let Some(tool) = state.service.tool(&tool_name) else {
        return (StatusCode::NOT_FOUND, "unknown tool\n").into_response();
    };
    let runtime = tool.runtime;
    let timeout = tool.timeout();

    let cancel = state.shutdown.child_token();
    let (tx, mut rx) = mpsc::channel::<Bytes>(sse::CHANNEL_CAPACITY);

    let service = state.service.clone();
    let task_cancel = cancel.clone();
    let rid = request_id.clone();
    let name = tool_name.clone();
    let task = tokio::spawn(async move {
        let mut sink = SseSink::new(tx.clone());

        // Peer disconnect shows up as channel closure; translate it into
        // cancellation so even a silent tool is torn down promptly.
        let watch_cancel = task_cancel.clone();
        let watcher = tokio::spawn(async move {
            tx.closed().await;
            watch_cancel.cancel();
        });

        let result = service
            .stream_tool(task_cancel, &rid, &name, &input, &mut sink)
            .await;

        match &result {
            Ok(()) => info!(request_id = %rid, tool = %name, "tool stream completed"),
            Err(err) if sink.started() => {
                error!(request_id = %rid, tool = %name, error = %err, "tool stream failed after start");
                let message = match err {
                    GatewayError::Busy => "tool busy".to_string(),
                    other => other.to_string(),
                };
                sink.send_error(&message).await;
            }
            // Pre-event errors are surfaced by the handler as a status.
            Err(_) => {}
        }

        watcher.abort();
        result
    });

    match rx.recv().await {
        Some(first) => {
            let rest = ReceiverStream::new(rx).map(Ok);
            let events = stream::once(std::future::ready(Ok::<Bytes, std::convert::Infallible>(
                first,
            )))
            .chain(rest);
            stream_response(&tool_name, runtime, timeout, Body::from_stream(events))
        }
        None => match task.await {
            Ok(Ok(())) => {
                // Tool finished without emitting a single line: an empty,
                // well-formed event stream.
                stream_response(&tool_name, runtime, timeout, Body::empty())
            }
            Ok(Err(err)) => error_response(&request_id, &tool_name, &err),
            Err(join_err) => {
                error!(request_id = %request_id, tool = %tool_name, error = %join_err, "tool task panicked");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error\n").into_response()
            }
        },
    }
}

/// Media type must be `application/json`, parameters ignored.
fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

fn stream_response(
    tool: &str,
    runtime: RuntimeKind,
    timeout: Duration,
    body: Body,
) -> Response {
    let built = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .header("x-mcp-tool", tool)
        .header("x-mcp-runtime", runtime.to_string())
        .header("x-mcp-timeout", format!("{timeout:?}"))
        .body(body);

    match built {
        Ok(resp) => resp,
        Err(err) => {
            error!(tool = %tool, error = %err, "building stream response failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "streaming unsupported\n").into_response()
        }
    }
}

/// Map a pre-first-event core error onto an HTTP status.
fn error_response(request_id: &str, tool: &str, err: &GatewayError) -> Response {
    match err {
        GatewayError::Busy => {
            warn!(request_id = %request_id, tool = %tool, "tool busy (concurrency limit)");
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, "1")],
                "tool busy\n",
            )
                .into_response()
        }
        GatewayError::UnknownTool(_) => (StatusCode::NOT_FOUND, "unknown tool\n").into_response(),
        GatewayError::InvalidToolName(_) => {
            (StatusCode::BAD_REQUEST, "invalid tool name\n").into_response()
        }
        GatewayError::InvalidInput => {
            (StatusCode::BAD_REQUEST, "body must be valid JSON\n").into_response()
        }
        other => {
            error!(request_id = %request_id, tool = %tool, error = %other, "tool stream failed before first event");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{other}\n")).into_response()
        }
    }
}
