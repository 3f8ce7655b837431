//! Container backend: indirect execution through the container CLI.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::{SpawnError, ToolRuntime, prepare};
use crate::config::{Config, Tool};

const DOCKER_BIN: &str = "docker";
const PROBE_TIMEOUT: Duration = Duration::from_millis(800);
const TMPFS_OPTS: &str = "rw,noexec,nosuid,size=64m";

pub struct DockerRuntime;

#[async_trait]
impl ToolRuntime for DockerRuntime {
    async fn spawn(&self, cfg: &Config, tool: &Tool) -> Result<Child, SpawnError> {
        let mut cmd = Command::new(DOCKER_BIN);
        cmd.args(run_args(cfg, tool));
        prepare(&mut cmd, cfg);

        cmd.spawn().map_err(|source| SpawnError::Io {
            command: DOCKER_BIN.to_string(),
            source,
        })
    }
}

/// Build the `docker run` argument list.
///
/// The hardening flag block always precedes the image reference; tool
/// arguments always follow it. No user-supplied string ever lands inside a
/// flag, so the image position anchors the flag/argument boundary.
fn run_args(cfg: &Config, tool: &Tool) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "-i".into(),
        "--rm".into(),
        "--security-opt=no-new-privileges".into(),
        "--cap-drop=ALL".into(),
        "--network".into(),
        tool.network().to_string(),
    ];

    if tool.read_only() {
        args.push("--read-only".into());
        args.push("--tmpfs".into());
        args.push(format!("/tmp:{TMPFS_OPTS}"));
        args.push("--tmpfs".into());
        args.push(format!("/var/tmp:{TMPFS_OPTS}"));
    }

    args.push("-v".into());
    args.push(format!("{}:/workspaces", cfg.workspace_root));

    // Value-less -e flags forward the variables set on the CLI's own
    // environment into the container.
    args.push("-e".into());
    args.push("WORKSPACE_ROOT".into());
    args.push("-e".into());
    args.push("TOOLS_ROOT".into());

    args.push(tool.image.clone().unwrap_or_default());
    args.extend(tool.args.iter().cloned());
    args
}

/// Probe the container CLI with a short version query. Success means the
/// backend is usable.
pub async fn docker_ready() -> anyhow::Result<()> {
    let probe = Command::new(DOCKER_BIN)
        .args(["version", "--format", "{{.Server.Version}}"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .output();

    let output = tokio::time::timeout(PROBE_TIMEOUT, probe)
        .await
        .map_err(|_| anyhow::anyhow!("docker probe timed out after {PROBE_TIMEOUT:?}"))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("docker probe failed: {}", stderr.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DockerNetwork, RuntimeKind};
    use std::collections::BTreeMap;

    fn cfg() -> Config {
        Config {
            workspace_root: "/srv/ws".into(),
            tools_root: "/srv/tools".into(),
            tools: BTreeMap::new(),
        }
    }

    fn tool() -> Tool {
        Tool {
            runtime: RuntimeKind::Container,
            mode: None,
            cmd: None,
            args: vec!["--flag".into(), "value".into()],
            image: Some("ghcr.io/acme/scan:1".into()),
            timeout_ms: 0,
            max_concurrent: 0,
            docker_network: None,
            read_only: None,
        }
    }

    #[test]
    fn hardening_flags_precede_the_image() {
        let args = run_args(&cfg(), &tool());
        let image_at = args.iter().position(|a| a == "ghcr.io/acme/scan:1").unwrap();

        for flag in ["--security-opt=no-new-privileges", "--cap-drop=ALL", "--read-only"] {
            let at = args.iter().position(|a| a == flag).unwrap();
            assert!(at < image_at, "{flag} must precede the image");
        }
        // Tool args always trail the image.
        assert_eq!(&args[image_at + 1..], &["--flag", "value"]);
    }

    #[test]
    fn network_defaults_to_none() {
        let args = run_args(&cfg(), &tool());
        let at = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[at + 1], "none");
    }

    #[test]
    fn bridge_network_is_passed_through() {
        let mut t = tool();
        t.docker_network = Some(DockerNetwork::Bridge);
        let args = run_args(&cfg(), &t);
        let at = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[at + 1], "bridge");
    }

    #[test]
    fn read_only_default_adds_tmpfs_mounts() {
        let args = run_args(&cfg(), &tool());
        assert!(args.contains(&"--read-only".to_string()));
        assert!(args.contains(&format!("/tmp:{TMPFS_OPTS}")));
        assert!(args.contains(&format!("/var/tmp:{TMPFS_OPTS}")));
    }

    #[test]
    fn explicit_writable_root_drops_tmpfs() {
        let mut t = tool();
        t.read_only = Some(false);
        let args = run_args(&cfg(), &t);
        assert!(!args.contains(&"--read-only".to_string()));
        assert!(!args.contains(&"--tmpfs".to_string()));
    }

    #[test]
    fn workspace_is_mounted() {
        let args = run_args(&cfg(), &tool());
        assert!(args.contains(&"/srv/ws:/workspaces".to_string()));
    }
}
