//! Direct execution of native tools.

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::{SpawnError, ToolRuntime, prepare};
use crate::config::{Config, Tool};

pub struct NativeRuntime;

#[async_trait]
impl ToolRuntime for NativeRuntime {
    async fn spawn(&self, cfg: &Config, tool: &Tool) -> Result<Child, SpawnError> {
        let program = tool.cmd.as_deref().ok_or(SpawnError::MissingCmd)?;

        let mut cmd = Command::new(program);
        cmd.args(&tool.args);
        prepare(&mut cmd, cfg);

        cmd.spawn().map_err(|source| SpawnError::Io {
            command: program.to_string(),
            source,
        })
    }
}
