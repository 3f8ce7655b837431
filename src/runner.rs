//! Glue between the core service and the runtime backends.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{Config, Tool};
use crate::process::ToolProcess;
use crate::runtime::{self, SpawnError};

pub struct Runner {
    cfg: Arc<Config>,
}

impl Runner {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self { cfg }
    }

    /// Start a tool process through the backend selected by its record.
    pub async fn start(
        &self,
        request_id: &str,
        tool_name: &str,
        tool: &Tool,
    ) -> Result<ToolProcess, SpawnError> {
        let backend = runtime::from_tool(tool);

        info!(
            request_id = %request_id,
            tool = %tool_name,
            runtime = %tool.runtime,
            mode = %tool.mode(),
            "spawning tool process"
        );

        let child = backend.spawn(&self.cfg, tool).await?;
        let proc = ToolProcess::new(tool_name, request_id, child);
        debug!(request_id = %request_id, tool = %tool_name, pid = proc.pid(), "tool process started");
        Ok(proc)
    }
}
