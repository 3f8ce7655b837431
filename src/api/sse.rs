//! SSE framing and the streaming line sink.
//!
//! Each channel item is one complete, already-framed SSE event, so the
//! response body flushes event by event. The channel bound is what applies
//! back-pressure to tools that outpace a slow peer.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::service::LineSink;

/// In-flight frames buffered per request before the relay awaits the peer.
pub const CHANNEL_CAPACITY: usize = 32;

/// Build one SSE frame: event line, data line, blank line. The payload is
/// trimmed of surrounding whitespace and written verbatim.
pub fn frame(event: &str, data: &[u8]) -> Bytes {
    let data = data.trim_ascii();
    let mut buf = Vec::with_capacity(event.len() + data.len() + 16);
    buf.extend_from_slice(b"event: ");
    buf.extend_from_slice(event.as_bytes());
    buf.extend_from_slice(b"\ndata: ");
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\n\n");
    Bytes::from(buf)
}

/// Serializes core output lines as `message` events and tracks the
/// error-phase split: before any event the HTTP status is still open; after
/// the first event at most one terminal `error` event may be sent.
pub struct SseSink {
    tx: mpsc::Sender<Bytes>,
    started: bool,
    error_sent: bool,
}

impl SseSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx,
            started: false,
            error_sent: false,
        }
    }

    /// Whether any event has been handed to the peer.
    pub fn started(&self) -> bool {
        self.started
    }

    /// Emit the terminal `error` event, at most once per request.
    pub async fn send_error(&mut self, message: &str) {
        if self.error_sent {
            return;
        }
        self.error_sent = true;
        let payload = serde_json::json!({ "error": message }).to_string();
        let _ = self.tx.send(frame("error", payload.as_bytes())).await;
    }
}

#[async_trait]
impl LineSink for SseSink {
    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.started = true;
        self.tx
            .send(frame("message", line))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer disconnected"))
    }
}
