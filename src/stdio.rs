//! Line transport: JSON event envelopes over a duplex byte stream.
//!
//! One request envelope per input line; every emitted event is one output
//! line. A single mutex around the writer keeps events from concurrent
//! in-flight requests from interleaving mid-line.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::observability;
use crate::process::MAX_LINE_BYTES;
use crate::service::{GatewayError, LineSink, Service};

/// One request: `{"id":"1","tool":"echo","input":{...}}`.
#[derive(Debug, Deserialize)]
struct RequestEnvelope {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    tool: String,
    #[serde(default)]
    input: Option<Box<RawValue>>,
}

/// One emitted event: `{"event":"message","id":"1","data":{...}}`.
#[derive(Serialize)]
struct EventEnvelope<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a RawValue>,
}

pub struct LineTransport<R, W> {
    service: Arc<Service>,
    input: R,
    output: Arc<Mutex<W>>,
}

impl LineTransport<tokio::io::Stdin, tokio::io::Stdout> {
    pub fn over_stdio(service: Arc<Service>) -> Self {
        Self::new(service, tokio::io::stdin(), tokio::io::stdout())
    }
}

impl<R, W> LineTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(service: Arc<Service>, input: R, output: W) -> Self {
        Self {
            service,
            input,
            output: Arc::new(Mutex::new(output)),
        }
    }

    /// Read envelopes until EOF or cancellation. Each request runs as its
    /// own task; in-flight requests are drained before returning.
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut lines = FramedRead::new(self.input, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        let mut inflight = JoinSet::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = lines.next() => next,
            };

            let line = match next {
                None => break,
                Some(line) => line.context("scan input")?,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let req: RequestEnvelope = match serde_json::from_str(line) {
                Ok(req) => req,
                Err(err) => {
                    emit_json(
                        &self.output,
                        None,
                        "error",
                        serde_json::json!({ "error": "invalid_json", "detail": err.to_string() }),
                    )
                    .await?;
                    continue;
                }
            };

            if req.tool.is_empty() {
                emit_json(
                    &self.output,
                    req.id.as_deref(),
                    "error",
                    serde_json::json!({ "error": "missing_tool" }),
                )
                .await?;
                continue;
            }

            let service = self.service.clone();
            let output = self.output.clone();
            let token = cancel.child_token();
            inflight.spawn(handle_request(service, output, token, req));
        }

        debug!("line transport input closed, draining in-flight requests");
        while inflight.join_next().await.is_some() {}
        Ok(())
    }
}

async fn handle_request<W>(
    service: Arc<Service>,
    output: Arc<Mutex<W>>,
    cancel: CancellationToken,
    req: RequestEnvelope,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let input: Vec<u8> = req
        .input
        .as_ref()
        .map(|raw| raw.get().as_bytes().to_vec())
        .unwrap_or_else(|| b"{}".to_vec());

    let request_id = match &req.id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => observability::fresh_request_id(),
    };

    let mut sink = StdioSink {
        id: req.id.clone(),
        output: output.clone(),
    };

    let result = service
        .stream_tool(cancel, &request_id, &req.tool, &input, &mut sink)
        .await;

    let id = req.id.as_deref();
    let emitted = match result {
        Ok(()) => emit_json(&output, id, "done", serde_json::json!({ "ok": true })).await,
        Err(GatewayError::InvalidToolName(_)) => {
            emit_json(
                &output,
                id,
                "error",
                serde_json::json!({ "error": "invalid_tool_name" }),
            )
            .await
        }
        Err(err) => {
            emit_json(
                &output,
                id,
                "error",
                serde_json::json!({ "error": "tool_failed", "detail": err.to_string() }),
            )
            .await
        }
    };
    if let Err(err) = emitted {
        debug!(error = %err, "line transport peer gone");
    }
}

/// Forwards each tool output line as a `message` event with the line bytes
/// embedded untouched.
struct StdioSink<W> {
    id: Option<String>,
    output: Arc<Mutex<W>>,
}

#[async_trait]
impl<W> LineSink for StdioSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        // The protocol requires tools to emit JSON lines; embedding anything
        // else would corrupt the envelope.
        let raw: Box<RawValue> =
            serde_json::from_slice(line).map_err(std::io::Error::other)?;
        write_event(&self.output, self.id.as_deref(), "message", Some(&raw)).await
    }
}

async fn emit_json<W>(
    output: &Mutex<W>,
    id: Option<&str>,
    event: &str,
    payload: serde_json::Value,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let raw = RawValue::from_string(payload.to_string()).map_err(std::io::Error::other)?;
    write_event(output, id, event, Some(&raw)).await
}

async fn write_event<W>(
    output: &Mutex<W>,
    id: Option<&str>,
    event: &str,
    data: Option<&RawValue>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let envelope = EventEnvelope { event, id, data };
    let mut buf = serde_json::to_vec(&envelope).map_err(std::io::Error::other)?;
    buf.push(b'\n');

    let mut writer = output.lock().await;
    writer.write_all(&buf).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_defaults() {
        let req: RequestEnvelope = serde_json::from_str(r#"{"tool":"echo"}"#).unwrap();
        assert!(req.id.is_none());
        assert!(req.input.is_none());

        let req: RequestEnvelope =
            serde_json::from_str(r#"{"id":"1","tool":"echo","input":{"a":1}}"#).unwrap();
        assert_eq!(req.id.as_deref(), Some("1"));
        assert_eq!(req.input.unwrap().get(), r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn event_envelope_omits_empty_fields() {
        let out = Mutex::new(Vec::new());
        write_event(&out, None, "done", None).await.unwrap();
        assert_eq!(out.into_inner(), b"{\"event\":\"done\"}\n");
    }

    #[tokio::test]
    async fn event_envelope_preserves_data_bytes() {
        let out = Mutex::new(Vec::new());
        // Key order must survive exactly as the tool wrote it.
        let raw = RawValue::from_string(r#"{"b":2,"a":1}"#.to_string()).unwrap();
        write_event(&out, Some("x"), "message", Some(&raw))
            .await
            .unwrap();
        assert_eq!(
            out.into_inner(),
            b"{\"event\":\"message\",\"id\":\"x\",\"data\":{\"b\":2,\"a\":1}}\n"
        );
    }
}
