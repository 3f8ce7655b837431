//! Shared state for the HTTP transport.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::service::Service;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
    /// Fired on graceful shutdown; in-flight requests derive their
    /// cancellation from it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            service,
            shutdown: CancellationToken::new(),
        }
    }
}
