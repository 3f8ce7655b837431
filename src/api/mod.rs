//! HTTP transport: server assembly and graceful shutdown.

mod handlers;
mod hardening;
mod routes;
mod sse;
mod state;

pub use routes::{MAX_BODY_BYTES, REQUEST_READ_TIMEOUT, router};
pub use state::AppState;

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::service::Service;

/// How long in-flight requests get to finish after the shutdown signal.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Serve the gateway until SIGINT/SIGTERM, then drain gracefully.
pub async fn serve(addr: SocketAddr, service: Arc<Service>) -> anyhow::Result<()> {
    let state = AppState::new(service);
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(%addr, "listening");

    let signal_token = shutdown.clone();
    let graceful = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received, draining in-flight requests");
            // In-flight tool runs observe this through their child tokens.
            signal_token.cancel();
        })
        .into_future();

    tokio::select! {
        res = graceful => res.context("running server")?,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            warn!(grace = ?SHUTDOWN_GRACE, "graceful shutdown timed out, forcing exit");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
