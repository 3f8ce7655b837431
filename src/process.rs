//! Handle around a spawned tool process.
//!
//! Owns the child's streams for the duration of one request, drains stderr
//! on a background task, and guarantees teardown of the whole descendant
//! tree through an idempotent [`ToolProcess::close`].

use std::process::ExitStatus;
use std::time::Duration;

use futures::StreamExt;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

use crate::runtime::kill_process_group;

/// Bounded line length for tool output and stderr.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Stderr lines logged per request before truncation.
pub const STDERR_LINE_CAP: u64 = 5_000;

/// How long `close` waits for the stderr drain to hit EOF before aborting it.
const DRAIN_JOIN_GRACE: Duration = Duration::from_secs(2);

pub struct ToolProcess {
    tool: String,
    pid: u32,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    drain: Option<JoinHandle<()>>,
    closed: bool,
    reaped: bool,
    started_at: Instant,
}

impl ToolProcess {
    pub fn new(tool: &str, request_id: &str, mut child: Child) -> Self {
        let pid = child.id().unwrap_or_default();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let drain = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(tool.to_string(), request_id.to_string(), stderr)));

        Self {
            tool: tool.to_string(),
            pid,
            child,
            stdin,
            stdout,
            drain,
            closed: false,
            reaped: false,
            started_at: Instant::now(),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Reap the child and log its exit once.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.reaped = true;
        debug!(
            tool = %self.tool,
            pid = self.pid,
            status = %status,
            duration_ms = self.started_at.elapsed().as_millis() as u64,
            "tool process exited"
        );
        Ok(status)
    }

    /// Tear down the process and join the stderr drain. Idempotent; a child
    /// that was already reaped is not signalled again.
    pub async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            if !self.reaped {
                kill_process_group(&mut self.child).await;
                if matches!(self.child.try_wait(), Ok(Some(_))) {
                    self.reaped = true;
                }
            }
        }

        if let Some(mut handle) = self.drain.take() {
            // The kill above closes the pipe, so EOF is imminent; an orphan
            // holding the write end open is the only reason to abort.
            if tokio::time::timeout(DRAIN_JOIN_GRACE, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }
}

/// Consume the error stream, logging each line at debug level until the cap.
async fn drain_stderr(tool: String, request_id: String, stderr: tokio::process::ChildStderr) {
    let mut lines = FramedRead::new(stderr, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    let mut count: u64 = 0;

    while let Some(next) = lines.next().await {
        match next {
            Ok(line) => {
                count += 1;
                if count <= STDERR_LINE_CAP {
                    debug!(
                        tool = %tool,
                        request_id = %request_id,
                        stderr_line = count,
                        line = %line,
                        "tool stderr"
                    );
                } else if count == STDERR_LINE_CAP + 1 {
                    warn!(
                        tool = %tool,
                        request_id = %request_id,
                        cap = STDERR_LINE_CAP,
                        "tool stderr truncated, draining without logging"
                    );
                }
            }
            Err(err) => {
                debug!(tool = %tool, request_id = %request_id, error = %err, "tool stderr read failed");
                break;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::io::AsyncWriteExt;
    use tokio::process::Command;

    fn spawn(script: &str) -> Child {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.process_group(0);
        cmd.spawn().unwrap()
    }

    #[tokio::test]
    async fn wait_reports_exit_status() {
        let mut proc = ToolProcess::new("t", "r", spawn("exit 3"));
        let status = proc.wait().await.unwrap();
        assert_eq!(status.code(), Some(3));
        proc.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut proc = ToolProcess::new("t", "r", spawn("sleep 30"));
        proc.close().await;
        let start = std::time::Instant::now();
        proc.close().await;
        // Second close returns immediately: nothing left to signal or join.
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn close_kills_a_running_child() {
        let mut proc = ToolProcess::new("t", "r", spawn("sleep 30"));
        proc.close().await;
        assert!(matches!(proc.child.try_wait(), Ok(Some(_))));
    }

    #[tokio::test]
    async fn streams_are_taken_once() {
        let mut proc = ToolProcess::new("t", "r", spawn("cat"));
        let mut stdin = proc.take_stdin().unwrap();
        assert!(proc.take_stdin().is_none());
        assert!(proc.take_stdout().is_some());
        assert!(proc.take_stdout().is_none());

        stdin.shutdown().await.unwrap();
        drop(stdin);
        let status = proc.wait().await.unwrap();
        assert!(status.success());
        proc.close().await;
    }

    #[tokio::test]
    async fn stderr_drain_ends_on_child_exit() {
        let mut proc = ToolProcess::new("t", "r", spawn("echo oops >&2; exit 1"));
        let status = proc.wait().await.unwrap();
        assert_eq!(status.code(), Some(1));
        let start = std::time::Instant::now();
        proc.close().await;
        assert!(start.elapsed() < DRAIN_JOIN_GRACE);
    }
}
