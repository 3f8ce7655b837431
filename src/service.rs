//! Core streaming service: admission, timeouts, input framing, output relay,
//! and cancellation-driven teardown.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, RuntimeKind, Tool};
use crate::process::{MAX_LINE_BYTES, ToolProcess};
use crate::runner::Runner;
use crate::runtime::SpawnError;
use crate::sandbox::{self, SandboxError};

/// Receives the tool's output, one line per call.
///
/// An error from `write_line` means the peer can no longer receive; the core
/// treats it exactly like cancellation.
#[async_trait]
pub trait LineSink: Send {
    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()>;
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid tool name: {0}")]
    InvalidToolName(#[from] SandboxError),
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// Distinguished value the transports map to their "busy" surface.
    #[error("tool is busy")]
    Busy,
    #[error("invalid input json")]
    InvalidInput,
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("write stdin: {0}")]
    WriteStdin(#[source] std::io::Error),
    #[error("read stdout: {0}")]
    ReadStdout(String),
    #[error("write event: {0}")]
    SinkWrite(#[source] std::io::Error),
    #[error("tool timed out after {0:?}")]
    DeadlineExceeded(Duration),
    #[error("canceled")]
    Canceled,
    #[error("tool exited with {0}")]
    ToolFailed(ExitStatus),
    #[error("wait: {0}")]
    Wait(#[source] std::io::Error),
}

/// Catalog entry summary for listings and readiness.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub runtime: RuntimeKind,
    pub mode: String,
}

pub struct Service {
    cfg: Arc<Config>,
    runner: Runner,
    // Per-tool admission slots, created lazily. The lock is held only while
    // looking up or inserting a counter, never across an acquire.
    slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Service {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            runner: Runner::new(cfg.clone()),
            cfg,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.cfg.tools.get(name)
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.cfg
            .tools
            .iter()
            .map(|(name, tool)| ToolInfo {
                name: name.clone(),
                runtime: tool.runtime,
                mode: tool.mode().to_string(),
            })
            .collect()
    }

    fn slot(&self, tool_name: &str, tool: &Tool) -> Arc<Semaphore> {
        let mut slots = self.slots.lock().expect("slot map poisoned");
        slots
            .entry(tool_name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(tool.max_concurrent())))
            .clone()
    }

    /// Non-blocking, fail-fast admission.
    fn try_admit(
        &self,
        tool_name: &str,
        tool: &Tool,
    ) -> Result<OwnedSemaphorePermit, GatewayError> {
        self.slot(tool_name, tool)
            .try_acquire_owned()
            .map_err(|_| GatewayError::Busy)
    }

    /// Run a tool in launcher mode: write one input line, close its stdin,
    /// and relay every output line into `sink`.
    ///
    /// Every execution carries the tool's effective timeout; cancellation of
    /// `cancel` (peer gone, shutdown) and the timeout both tear the process
    /// tree down through the handle's close.
    pub async fn stream_tool(
        &self,
        cancel: CancellationToken,
        request_id: &str,
        tool_name: &str,
        input: &[u8],
        sink: &mut dyn LineSink,
    ) -> Result<(), GatewayError> {
        let start = tokio::time::Instant::now();

        sandbox::validate_tool_name(tool_name)?;
        let tool = self
            .tool(tool_name)
            .ok_or_else(|| GatewayError::UnknownTool(tool_name.to_string()))?
            .clone();

        let permit = match self.try_admit(tool_name, &tool) {
            Ok(permit) => permit,
            Err(err) => {
                warn!(
                    request_id = %request_id,
                    tool = %tool_name,
                    max_concurrent = tool.max_concurrent(),
                    "tool concurrency limit reached"
                );
                return Err(err);
            }
        };

        info!(
            request_id = %request_id,
            tool = %tool_name,
            runtime = %tool.runtime,
            mode = %tool.mode(),
            max_concurrent = tool.max_concurrent(),
            "tool execution started"
        );

        // The deadline covers spawn as well as streaming.
        let deadline = start + tool.timeout();
        let result = self
            .run_streaming(&cancel, deadline, request_id, tool_name, &tool, input, sink)
            .await;
        drop(permit);

        let duration_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(
                request_id = %request_id,
                tool = %tool_name,
                runtime = %tool.runtime,
                duration_ms,
                "tool execution completed"
            ),
            Err(err) => error!(
                request_id = %request_id,
                tool = %tool_name,
                runtime = %tool.runtime,
                duration_ms,
                error = %err,
                "tool execution failed"
            ),
        }
        result
    }

    async fn run_streaming(
        &self,
        cancel: &CancellationToken,
        deadline: tokio::time::Instant,
        request_id: &str,
        tool_name: &str,
        tool: &Tool,
        input: &[u8],
        sink: &mut dyn LineSink,
    ) -> Result<(), GatewayError> {
        let mut proc = self.runner.start(request_id, tool_name, tool).await?;

        let result = tokio::select! {
            res = relay(&mut proc, request_id, tool_name, input, sink) => res,
            _ = cancel.cancelled() => Err(GatewayError::Canceled),
            _ = tokio::time::sleep_until(deadline) => {
                Err(GatewayError::DeadlineExceeded(tool.timeout()))
            }
        };

        // Covers every exit path; kills the descendant tree when the child
        // is still running and joins the stderr drain.
        proc.close().await;
        result
    }
}

async fn relay(
    proc: &mut ToolProcess,
    request_id: &str,
    tool_name: &str,
    input: &[u8],
    sink: &mut dyn LineSink,
) -> Result<(), GatewayError> {
    let mut buf: Vec<u8> = if input.is_empty() {
        b"{}".to_vec()
    } else {
        input.to_vec()
    };
    serde_json::from_slice::<serde::de::IgnoredAny>(&buf)
        .map_err(|_| GatewayError::InvalidInput)?;
    if buf.last() != Some(&b'\n') {
        buf.push(b'\n');
    }

    // One line in, then EOF: the close is what tells a launcher to finish.
    let mut stdin = proc
        .take_stdin()
        .ok_or_else(|| GatewayError::WriteStdin(std::io::Error::other("stdin unavailable")))?;
    stdin.write_all(&buf).await.map_err(GatewayError::WriteStdin)?;
    stdin.shutdown().await.map_err(GatewayError::WriteStdin)?;
    drop(stdin);

    let stdout = proc
        .take_stdout()
        .ok_or_else(|| GatewayError::ReadStdout("stdout unavailable".to_string()))?;
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_BYTES));

    let mut relayed: u64 = 0;
    while let Some(next) = lines.next().await {
        let line = next.map_err(|err| GatewayError::ReadStdout(err.to_string()))?;
        if line.is_empty() {
            continue;
        }
        sink.write_line(line.as_bytes())
            .await
            .map_err(GatewayError::SinkWrite)?;

        relayed += 1;
        if relayed % 200 == 0 {
            debug!(
                request_id = %request_id,
                tool = %tool_name,
                lines_out = relayed,
                "streaming progress"
            );
        }
    }

    let status = proc.wait().await.map_err(GatewayError::Wait)?;
    if !status.success() {
        return Err(GatewayError::ToolFailed(status));
    }
    Ok(())
}
