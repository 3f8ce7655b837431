//! Tool catalog configuration.
//!
//! The catalog is loaded once at process start from a TOML file and is
//! read-only afterwards. Validation failures are fatal at startup.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sandbox;

/// Effective timeout when a tool does not declare one.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Effective per-tool concurrency when a tool does not declare one.
pub const DEFAULT_MAX_CONCURRENT: usize = 1;

/// Upper bound on per-tool concurrency; larger configured values are clamped.
pub const MAX_ALLOWED_CONCURRENCY: usize = 32;

/// How a tool's child process is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Direct execution of `cmd`.
    Native,
    /// Indirect execution through the container CLI.
    Container,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::Native => write!(f, "native"),
            RuntimeKind::Container => write!(f, "container"),
        }
    }
}

/// Tool invocation mode. Only `launcher` is implemented; `daemon` is parsed
/// so the load error can name it, and rejected by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolMode {
    Launcher,
    Daemon,
}

impl std::fmt::Display for ToolMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolMode::Launcher => write!(f, "launcher"),
            ToolMode::Daemon => write!(f, "daemon"),
        }
    }
}

/// Network attachment for container tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockerNetwork {
    #[default]
    None,
    Bridge,
}

impl std::fmt::Display for DockerNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DockerNetwork::None => write!(f, "none"),
            DockerNetwork::Bridge => write!(f, "bridge"),
        }
    }
}

/// One catalog entry. Immutable after load.
#[derive(Debug, Clone, Deserialize)]
pub struct Tool {
    pub runtime: RuntimeKind,
    #[serde(default)]
    pub mode: Option<ToolMode>,

    /// Command path, required for the native runtime.
    #[serde(default)]
    pub cmd: Option<String>,
    /// Literal arguments passed after any runtime-owned arguments. Never
    /// interpreted by a shell.
    #[serde(default)]
    pub args: Vec<String>,

    /// Image reference, required for the container runtime.
    #[serde(default)]
    pub image: Option<String>,

    /// 0 means "use default". The effective timeout is always positive.
    #[serde(default)]
    pub timeout_ms: i64,
    /// 0 means "use default".
    #[serde(default)]
    pub max_concurrent: i64,

    /// Container only; defaults to `none`.
    #[serde(default)]
    pub docker_network: Option<DockerNetwork>,
    /// Container only; tri-state so unset can default to true.
    #[serde(default)]
    pub read_only: Option<bool>,
}

impl Tool {
    /// Effective timeout. No tool ever runs without one.
    pub fn timeout(&self) -> Duration {
        if self.timeout_ms <= 0 {
            DEFAULT_TOOL_TIMEOUT
        } else {
            Duration::from_millis(self.timeout_ms as u64)
        }
    }

    /// Effective concurrency cap, in `[1, MAX_ALLOWED_CONCURRENCY]`.
    pub fn max_concurrent(&self) -> usize {
        if self.max_concurrent <= 0 {
            DEFAULT_MAX_CONCURRENT
        } else {
            (self.max_concurrent as usize).min(MAX_ALLOWED_CONCURRENCY)
        }
    }

    pub fn mode(&self) -> ToolMode {
        self.mode.unwrap_or(ToolMode::Launcher)
    }

    pub fn network(&self) -> DockerNetwork {
        self.docker_network.unwrap_or_default()
    }

    /// Container root filesystem read-only unless explicitly disabled.
    pub fn read_only(&self) -> bool {
        self.read_only.unwrap_or(true)
    }
}

/// The tool catalog plus the workspace roots exported to every child.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub workspace_root: String,
    pub tools_root: String,
    pub tools: BTreeMap<String, Tool>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid toml in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("config: {0}")]
    Invalid(String),
}

impl Config {
    /// Load and validate a catalog file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&data).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(data: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(data).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace_root.is_empty() {
            return Err(ConfigError::Invalid("workspace_root is required".into()));
        }
        if self.tools_root.is_empty() {
            return Err(ConfigError::Invalid("tools_root is required".into()));
        }
        if self.tools.is_empty() {
            return Err(ConfigError::Invalid("tools must not be empty".into()));
        }

        for (name, tool) in &self.tools {
            if let Err(err) = sandbox::validate_tool_name(name) {
                return Err(ConfigError::Invalid(format!("tools[{name}]: {err}")));
            }

            match tool.runtime {
                RuntimeKind::Native => {
                    if tool.cmd.as_deref().unwrap_or("").is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "tools[{name}].cmd is required for native runtime"
                        )));
                    }
                }
                RuntimeKind::Container => {
                    if tool.image.as_deref().unwrap_or("").is_empty() {
                        return Err(ConfigError::Invalid(format!(
                            "tools[{name}].image is required for container runtime"
                        )));
                    }
                }
            }

            if tool.mode == Some(ToolMode::Daemon) {
                return Err(ConfigError::Invalid(format!(
                    "tools[{name}].mode daemon is not supported"
                )));
            }

            if tool.timeout_ms < 0 {
                return Err(ConfigError::Invalid(format!(
                    "tools[{name}].timeout_ms must be >= 0"
                )));
            }

            if tool.max_concurrent < 0 {
                return Err(ConfigError::Invalid(format!(
                    "tools[{name}].max_concurrent must be >= 0"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
        workspace_root = "/tmp/ws"
        tools_root = "/tmp/tools"

        [tools.echo]
        runtime = "native"
        cmd = "/bin/cat"

        [tools.scan]
        runtime = "container"
        image = "ghcr.io/acme/scan:1"
        args = ["--fast"]
        timeout_ms = 5000
        max_concurrent = 4
        docker_network = "bridge"
        read_only = false
    "#;

    #[test]
    fn parses_basic_catalog() {
        let cfg = Config::from_toml_str(BASIC).unwrap();
        assert_eq!(cfg.tools.len(), 2);

        let echo = &cfg.tools["echo"];
        assert_eq!(echo.runtime, RuntimeKind::Native);
        assert_eq!(echo.timeout(), DEFAULT_TOOL_TIMEOUT);
        assert_eq!(echo.max_concurrent(), DEFAULT_MAX_CONCURRENT);
        assert_eq!(echo.mode(), ToolMode::Launcher);
        assert_eq!(echo.network(), DockerNetwork::None);
        assert!(echo.read_only());

        let scan = &cfg.tools["scan"];
        assert_eq!(scan.runtime, RuntimeKind::Container);
        assert_eq!(scan.timeout(), Duration::from_millis(5000));
        assert_eq!(scan.max_concurrent(), 4);
        assert_eq!(scan.network(), DockerNetwork::Bridge);
        assert!(!scan.read_only());
    }

    #[test]
    fn zero_timeout_uses_default() {
        let tool = Config::from_toml_str(BASIC).unwrap().tools["echo"].clone();
        assert_eq!(tool.timeout_ms, 0);
        assert!(tool.timeout() > Duration::ZERO);
    }

    #[test]
    fn oversized_concurrency_is_clamped() {
        let cfg = Config::from_toml_str(
            r#"
            workspace_root = "/ws"
            tools_root = "/t"
            [tools.big]
            runtime = "native"
            cmd = "/bin/true"
            max_concurrent = 1000
        "#,
        )
        .unwrap();
        assert_eq!(cfg.tools["big"].max_concurrent(), MAX_ALLOWED_CONCURRENCY);
    }

    #[test]
    fn negative_timeout_rejected() {
        let err = Config::from_toml_str(
            r#"
            workspace_root = "/ws"
            tools_root = "/t"
            [tools.bad]
            runtime = "native"
            cmd = "/bin/true"
            timeout_ms = -1
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("timeout_ms"));
    }

    #[test]
    fn daemon_mode_rejected() {
        let err = Config::from_toml_str(
            r#"
            workspace_root = "/ws"
            tools_root = "/t"
            [tools.bad]
            runtime = "native"
            cmd = "/bin/true"
            mode = "daemon"
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("daemon"));
    }

    #[test]
    fn native_requires_cmd() {
        let err = Config::from_toml_str(
            r#"
            workspace_root = "/ws"
            tools_root = "/t"
            [tools.bad]
            runtime = "native"
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cmd is required"));
    }

    #[test]
    fn container_requires_image() {
        let err = Config::from_toml_str(
            r#"
            workspace_root = "/ws"
            tools_root = "/t"
            [tools.bad]
            runtime = "container"
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("image is required"));
    }

    #[test]
    fn tool_names_are_validated_at_load() {
        let err = Config::from_toml_str(
            r#"
            workspace_root = "/ws"
            tools_root = "/t"
            [tools."bad name"]
            runtime = "native"
            cmd = "/bin/true"
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("whitespace"));
    }

    #[test]
    fn empty_catalog_rejected() {
        let err = Config::from_toml_str(
            r#"
            workspace_root = "/ws"
            tools_root = "/t"
            [tools]
        "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }
}
