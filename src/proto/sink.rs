use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

/// The client-facing byte sink for one connection.
///
/// Exactly one writer writes to a sink per response: either the streaming
/// dispatcher (normal path) or the protocol machine's default/error-response
/// writer (fallback path). `closing` is the flag the task-completion handler
/// checks to tell which case it is in — set by whichever writer finishes
/// first, mirroring `transport.is_closing()` in the original asyncio design.
pub struct Sink {
    writer: Mutex<OwnedWriteHalf>,
    closing: AtomicBool,
}

impl Sink {
    pub fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            writer: Mutex::new(writer),
            closing: AtomicBool::new(false),
        }
    }

    pub async fn write_all(&self, buf: &[u8]) -> std::io::Result<()> {
        let mut w = self.writer.lock().await;
        w.write_all(buf).await
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Flush, shut the write half down, and mark the sink closing so the
    /// task-completion handler knows not to write a second response.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let mut w = self.writer.lock().await;
        let _ = w.flush().await;
        let _ = w.shutdown().await;
    }
}
