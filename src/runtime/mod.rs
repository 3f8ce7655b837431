//! Runtime backends: turn a tool record into a running child process.
//!
//! Both backends expose the same contract: a started child with piped
//! stdin/stdout/stderr, placed in its own process group, with the workspace
//! roots exported in its environment. Neither backend uses a shell.

mod docker;
mod kill;
mod native;

pub use docker::{DockerRuntime, docker_ready};
pub use kill::kill_process_group;
pub use native::NativeRuntime;

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, Command};

use crate::config::{Config, RuntimeKind, Tool};

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("tool has no cmd configured")]
    MissingCmd,
    #[error("spawn {command}: {source}")]
    Io {
        command: String,
        source: std::io::Error,
    },
}

/// A started tool process provider.
#[async_trait]
pub trait ToolRuntime: Send + Sync {
    async fn spawn(&self, cfg: &Config, tool: &Tool) -> Result<Child, SpawnError>;
}

/// Select the backend for a tool record.
pub fn from_tool(tool: &Tool) -> Box<dyn ToolRuntime> {
    match tool.runtime {
        RuntimeKind::Native => Box::new(NativeRuntime),
        RuntimeKind::Container => Box::new(DockerRuntime),
    }
}

/// Shared spawn setup: piped streams, workspace environment, fresh process
/// group so the kill primitive can signal the whole descendant tree.
fn prepare(cmd: &mut Command, cfg: &Config) {
    cmd.env("WORKSPACE_ROOT", &cfg.workspace_root)
        .env("TOOLS_ROOT", &cfg.tools_root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
}
