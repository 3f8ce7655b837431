use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use toolgate::api;
use toolgate::config::Config;
use toolgate::observability::{self, LogFormat};
use toolgate::service::Service;
use toolgate::stdio::LineTransport;

#[derive(Debug, Parser)]
#[command(
    name = "toolgate",
    version,
    about = "Execution gateway for line-protocol tools.",
    propagate_version = true
)]
struct Cli {
    /// Path to the tool catalog file
    #[arg(long, value_name = "PATH", global = true, default_value = "toolgate.toml")]
    config: PathBuf,

    /// Log in plain text instead of JSON
    #[arg(long, global = true)]
    log_text: bool,

    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP transport
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
    /// Serve the line transport on stdin/stdout
    Stdio,
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let format = if cli.log_text {
        LogFormat::Text
    } else {
        LogFormat::Json
    };
    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    observability::init_tracing(format, level);

    let cfg = Config::load(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    for name in cfg.tools.keys() {
        info!(tool = %name, "loaded tool");
    }

    let service = Arc::new(Service::new(Arc::new(cfg)));

    match cli.command {
        Command::Serve { addr } => run_http(service, addr),
        Command::Stdio => run_stdio(service),
    }
}

#[tokio::main]
async fn run_http(service: Arc<Service>, addr: SocketAddr) -> Result<()> {
    api::serve(addr, service).await
}

#[tokio::main]
async fn run_stdio(service: Arc<Service>) -> Result<()> {
    let cancel = CancellationToken::new();

    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    LineTransport::over_stdio(service).run(cancel).await
}
