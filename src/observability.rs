//! Logging setup and request identity.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use uuid::Uuid;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Output format for the structured logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Initialize the tracing subscriber once for the process.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies.
pub fn init_tracing(format: LogFormat, default_level: &str) {
    let default_level = default_level.to_string();
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
            LogFormat::Text => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init(),
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
}

/// Resolve the request id for a request: a non-empty incoming id wins,
/// otherwise a fresh one is generated.
pub fn request_id(incoming: Option<&str>) -> String {
    match incoming.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => id.to_string(),
        None => fresh_request_id(),
    }
}

/// 128-bit random id, hex-encoded.
pub fn fresh_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}
