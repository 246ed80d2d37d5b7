//! Background reader that owns the read side of the stream.
//!
//! The stream has no way to cancel a read once it has started, so reads are
//! never tied to a single exchange. One long-lived task keeps reading and
//! tags every completed read with the exchange generation active at that
//! moment. Reads that complete while no exchange is active are dropped on
//! the spot; everything else is forwarded to the coordinator, which checks
//! the tag again before using it.

use std::cell::Cell;
use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use mupcoap_core::{DuplexStream, TimeProvider, is_fatal_stream_error};
use tokio::sync::{Notify, mpsc};

/// One completed `read()` from the stream.
#[derive(Debug)]
pub(crate) struct InboundChunk {
    /// Exchange generation that was active when the read completed.
    pub generation: u64,
    /// Bytes read, or the read error.
    pub result: Result<Vec<u8>, Arc<io::Error>>,
}

/// State shared between the coordinator and the reader task.
#[derive(Debug, Default)]
pub(crate) struct InboundState {
    /// Generation of the exchange currently waiting for a response.
    active: Cell<Option<u64>>,
    /// Chunks dropped because they belonged to no live exchange.
    stale_discarded: Cell<u64>,
    /// Signalled whenever the reader drops a stale chunk.
    stale_notify: Notify,
    /// Set once the reader task has exited.
    closed: Cell<bool>,
}

impl InboundState {
    pub fn activate(&self, generation: u64) {
        self.active.set(Some(generation));
    }

    pub fn deactivate(&self) {
        self.active.set(None);
    }

    pub fn active(&self) -> Option<u64> {
        self.active.get()
    }

    pub fn record_stale(&self) {
        self.stale_discarded.set(self.stale_discarded.get() + 1);
        self.stale_notify.notify_waiters();
    }

    /// Wait until the reader drops its next stale chunk.
    pub async fn stale_arrived(&self) {
        self.stale_notify.notified().await;
    }

    pub fn stale_discarded(&self) -> u64 {
        self.stale_discarded.get()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn mark_closed(&self) {
        self.closed.set(true);
    }
}

/// Marks the inbound side closed when the reader stops, including when it
/// panics.
struct ClosedOnExit(Rc<InboundState>);

impl Drop for ClosedOnExit {
    fn drop(&mut self) {
        self.0.mark_closed();
    }
}

/// Read loop. Exits on shutdown, on a fatal stream error, or when the
/// coordinator side of the channel is gone.
pub(crate) async fn reader_task<S: DuplexStream, T: TimeProvider>(
    stream: Rc<S>,
    time: T,
    inbound: Rc<InboundState>,
    chunk_tx: mpsc::UnboundedSender<InboundChunk>,
    idle_poll_interval: Duration,
    mut shutdown_rx: mpsc::UnboundedReceiver<()>,
) {
    let _closed = ClosedOnExit(inbound.clone());
    loop {
        let result = tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!("reader_task: shutdown requested");
                break;
            }
            result = stream.read() => result,
        };

        let idle = match &result {
            Ok(bytes) => bytes.is_empty(),
            Err(_) => true,
        };
        let fatal = matches!(&result, Err(e) if is_fatal_stream_error(e));

        match inbound.active() {
            Some(generation) => {
                tracing::trace!(
                    "reader_task: forwarding chunk for generation {} ({:?})",
                    generation,
                    result.as_ref().map(Vec::len)
                );
                let chunk = InboundChunk {
                    generation,
                    result: result.map_err(Arc::new),
                };
                if chunk_tx.send(chunk).is_err() {
                    tracing::debug!("reader_task: coordinator gone, exiting");
                    break;
                }
            }
            None => match &result {
                Ok(bytes) if bytes.is_empty() => {}
                Ok(bytes) => {
                    inbound.record_stale();
                    tracing::debug!(
                        "reader_task: discarding {} bytes received outside of an exchange",
                        bytes.len()
                    );
                }
                Err(e) => {
                    tracing::debug!("reader_task: read error outside of an exchange: {}", e);
                }
            },
        }

        if fatal {
            tracing::warn!("reader_task: stream closed, reader exiting");
            break;
        }

        if idle {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = time.sleep(idle_poll_interval) => {}
            }
        }
    }
}
