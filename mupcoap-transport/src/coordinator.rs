//! Request coordinator: one CoAP request in, exactly one outcome out.
//!
//! The stream carries no request identifiers at this layer, so the
//! coordinator runs one exchange at a time:
//!
//! 1. take the exchange slot (later callers queue behind it)
//! 2. make sure the stream is in raw CoAP mode
//! 3. drop anything left over from earlier exchanges and open a new
//!    generation
//! 4. encode and write the request
//! 5. wait for a chunk tagged with this generation, or the deadline
//! 6. decode, or fail with a specific [`ExchangeError`]
//!
//! A response that turns up after its exchange ended is tagged with a
//! generation nobody is waiting for (or with none at all) and is dropped.
//! Once a request is on the wire and its exchange ends without a reply
//! (timeout, or the caller dropped `send`), the stream stays quarantined:
//! the next request is not written until the late reply has been dropped or
//! `late_response_grace` has passed since the old deadline. A request whose
//! own timeout runs out while waiting fails with
//! [`ExchangeError::Timeout`] without being written.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use mupcoap_core::{
    CoapCodec, CoapRequest, DuplexStream, Method, Providers, TaskProvider, TimeError,
    TimeProvider,
};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::exchange::PendingExchange;
use crate::reader::{InboundChunk, InboundState, reader_task};
use crate::{
    ExchangeError, ExchangePhase, ExchangeResult, ModeController, SessionConfig, SessionMetrics,
    TransportMode,
};

/// Exclusive access to the inbound side for the duration of one exchange.
struct ExchangeSlot {
    chunk_rx: mpsc::UnboundedReceiver<InboundChunk>,
    last_generation: u64,
    /// Armed once a request is written; cleared when its exchange gets an
    /// answer. Still set while a reply to an abandoned request may come.
    late_watch: Option<LateWatch>,
}

#[derive(Debug, Clone, Copy)]
struct LateWatch {
    /// Provider time after which the late reply is considered lost.
    clears_at: Duration,
    /// Reader discard count when the request was written.
    stale_seen: u64,
}

impl ExchangeSlot {
    /// Drop chunks buffered from earlier exchanges. Returns how many of them
    /// carried bytes.
    fn drain_stale(&mut self) -> u64 {
        let mut drained = 0;
        while let Ok(chunk) = self.chunk_rx.try_recv() {
            if matches!(&chunk.result, Ok(bytes) if !bytes.is_empty()) {
                drained += 1;
            }
        }
        drained
    }

    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }
}

/// Clears the active generation when the exchange ends, including when the
/// caller drops the `send` future.
struct ActiveExchange<'a> {
    inbound: &'a InboundState,
}

impl<'a> ActiveExchange<'a> {
    fn open(inbound: &'a InboundState, generation: u64) -> Self {
        inbound.activate(generation);
        Self { inbound }
    }
}

impl Drop for ActiveExchange<'_> {
    fn drop(&mut self) {
        self.inbound.deactivate();
    }
}

/// Issues CoAP requests over a stream shared with the MUP1 control channel.
///
/// Must be created and used inside a [`tokio::task::LocalSet`]: the
/// inbound reader is spawned with `spawn_local`.
pub struct RequestCoordinator<P: Providers, S: DuplexStream, C: CoapCodec> {
    providers: P,
    stream: Rc<S>,
    codec: C,
    config: SessionConfig,
    mode: ModeController<S, P::Time>,
    inbound: Rc<InboundState>,
    slot: Mutex<ExchangeSlot>,
    phase: Cell<ExchangePhase>,
    metrics: RefCell<SessionMetrics>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    reader_handle: RefCell<Option<JoinHandle<()>>>,
}

impl<P: Providers, S: DuplexStream, C: CoapCodec> RequestCoordinator<P, S, C> {
    /// Create a coordinator and start reading from `stream`.
    pub fn new(providers: P, stream: S, codec: C, config: SessionConfig) -> Self {
        Self::with_shared_stream(providers, Rc::new(stream), codec, config)
    }

    /// Create a coordinator over a stream the caller keeps a handle to.
    pub fn with_shared_stream(providers: P, stream: Rc<S>, codec: C, config: SessionConfig) -> Self {
        let mode =
            ModeController::from_config(stream.clone(), providers.time().clone(), &config);
        let inbound = Rc::new(InboundState::default());
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        let reader_handle = providers.task().spawn_task(
            "inbound_reader",
            reader_task(
                stream.clone(),
                providers.time().clone(),
                inbound.clone(),
                chunk_tx,
                config.idle_poll_interval,
                shutdown_rx,
            ),
        );

        Self {
            providers,
            stream,
            codec,
            config,
            mode,
            inbound,
            slot: Mutex::new(ExchangeSlot {
                chunk_rx,
                last_generation: 0,
                late_watch: None,
            }),
            phase: Cell::new(ExchangePhase::Idle),
            metrics: RefCell::new(SessionMetrics::default()),
            shutdown_tx,
            reader_handle: RefCell::new(Some(reader_handle)),
        }
    }

    /// Switch the stream to raw CoAP mode if it is not already.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Transport`] if the mode-switch command could
    /// not be written.
    pub async fn ensure_coap_mode(&self) -> ExchangeResult<()> {
        self.mode.ensure_coap_mode().await
    }

    /// Send a request and wait for its response.
    ///
    /// Concurrent calls are queued and run one after another.
    ///
    /// # Errors
    ///
    /// - [`ExchangeError::Transport`]: mode switch, write or read failed
    /// - [`ExchangeError::Timeout`]: nothing arrived before the deadline
    /// - [`ExchangeError::NoResponse`]: the stream returned an empty read
    /// - [`ExchangeError::Decode`]: the codec rejected the response
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        payload: Option<&[u8]>,
    ) -> ExchangeResult<C::Response> {
        let mut slot = self.slot.lock().await;
        self.run_exchange(&mut slot, CoapRequest::new(method, path, payload))
            .await
    }

    /// Like [`send`](Self::send), but fails with [`ExchangeError::Busy`]
    /// instead of queueing behind an exchange in flight.
    pub async fn try_send(
        &self,
        method: Method,
        path: &str,
        payload: Option<&[u8]>,
    ) -> ExchangeResult<C::Response> {
        let mut slot = self.slot.try_lock().map_err(|_| ExchangeError::Busy)?;
        self.run_exchange(&mut slot, CoapRequest::new(method, path, payload))
            .await
    }

    /// Current transport mode of the stream.
    pub fn mode(&self) -> TransportMode {
        self.mode.mode()
    }

    /// Phase of the most recent exchange.
    pub fn phase(&self) -> ExchangePhase {
        self.phase.get()
    }

    /// Snapshot of session counters.
    pub fn metrics(&self) -> SessionMetrics {
        let mut metrics = self.metrics.borrow().clone();
        metrics.mode_switch_attempts = self.mode.switch_attempts();
        metrics.mode_switch_failures = self.mode.switch_failures();
        metrics.stale_chunks_discarded += self.inbound.stale_discarded();
        metrics
    }

    /// Configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the inbound reader has stopped (stream closed or `close()`).
    pub fn is_closed(&self) -> bool {
        self.inbound.is_closed()
    }

    /// Stop the inbound reader and wait for it to exit.
    ///
    /// Later exchanges fail with [`ExchangeError::Transport`].
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(());
        let handle = self.reader_handle.borrow_mut().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("RequestCoordinator: inbound reader failed: {}", e);
            }
        }
    }

    async fn run_exchange(
        &self,
        slot: &mut ExchangeSlot,
        request: CoapRequest<'_>,
    ) -> ExchangeResult<C::Response> {
        let result = self.exchange(slot, &request).await;
        match &result {
            Ok(_) => self.phase.set(ExchangePhase::Resolved),
            Err(e) => {
                tracing::debug!(
                    "RequestCoordinator: {} {} failed: {}",
                    request.method,
                    request.path,
                    e
                );
                self.metrics.borrow_mut().record_failure(e);
                if let Some(phase) = ExchangePhase::from_error(e) {
                    self.phase.set(phase);
                }
            }
        }
        // A timed-out request may still be answered; anything else either
        // got its answer or never reached the device.
        if !matches!(&result, Err(ExchangeError::Timeout { .. })) {
            slot.late_watch = None;
        }
        result
    }

    async fn exchange(
        &self,
        slot: &mut ExchangeSlot,
        request: &CoapRequest<'_>,
    ) -> ExchangeResult<C::Response> {
        if self.inbound.is_closed() {
            return Err(ExchangeError::closed());
        }

        self.phase.set(ExchangePhase::ModePending);
        self.mode.ensure_coap_mode().await?;
        self.wait_out_late_response(slot).await?;

        let drained = slot.drain_stale();
        if drained > 0 {
            tracing::debug!(
                "RequestCoordinator: dropped {} chunks left over from earlier exchanges",
                drained
            );
            self.metrics.borrow_mut().stale_chunks_discarded += drained;
        }

        let generation = slot.next_generation();
        let _active = ActiveExchange::open(&self.inbound, generation);

        let bytes = self.codec.encode(request);
        tracing::debug!(
            "RequestCoordinator: exchange {} {} {} ({} bytes, payload {} bytes)",
            generation,
            request.method,
            request.path,
            bytes.len(),
            request.payload_len()
        );
        self.stream
            .write(&bytes)
            .await
            .map_err(|e| ExchangeError::transport("write", e))?;

        let time = self.providers.time();
        let exchange =
            PendingExchange::dispatched(generation, request, time.now(), self.config.request_timeout);
        // Stays armed if this future is dropped before the reply arrives.
        slot.late_watch = Some(LateWatch {
            clears_at: exchange.deadline + self.config.late_response_grace,
            stale_seen: self.inbound.stale_discarded(),
        });
        self.metrics.borrow_mut().record_request_sent(bytes.len());
        self.phase.set(ExchangePhase::Sent);

        let response = self.await_response(slot, &exchange).await?;
        let round_trip = exchange.elapsed(time.now());
        let decoded = self.codec.decode(&response)?;

        tracing::debug!(
            "RequestCoordinator: exchange {} {} {} resolved ({} bytes in {:?})",
            exchange.generation,
            exchange.method,
            exchange.path,
            response.len(),
            round_trip
        );
        self.metrics
            .borrow_mut()
            .record_response(response.len(), round_trip);
        Ok(decoded)
    }

    /// Hold the next write back while an earlier request may still be
    /// answered: until its late reply has been dropped, or it is considered
    /// lost. Bytes that arrive once the new request is on the wire cannot be
    /// told apart from its own response.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::Timeout`] if this request's own timeout runs out
    /// first. The request is not written and the quarantine stays in place.
    async fn wait_out_late_response(&self, slot: &mut ExchangeSlot) -> ExchangeResult<()> {
        let Some(watch) = slot.late_watch else {
            return Ok(());
        };
        let time = self.providers.time();
        let give_up_at = time.now() + self.config.request_timeout;

        loop {
            let drained = slot.drain_stale();
            if drained > 0 {
                self.metrics.borrow_mut().stale_chunks_discarded += drained;
            }
            if drained > 0 || self.inbound.stale_discarded() > watch.stale_seen {
                tracing::debug!("RequestCoordinator: late response dropped, line is clear");
                slot.late_watch = None;
                return Ok(());
            }

            let now = time.now();
            if now >= watch.clears_at {
                tracing::debug!("RequestCoordinator: late response considered lost");
                slot.late_watch = None;
                return Ok(());
            }
            if now >= give_up_at {
                tracing::debug!("RequestCoordinator: still waiting for a late response, not writing");
                return Err(ExchangeError::Timeout {
                    after: self.config.request_timeout,
                });
            }

            let wait = watch.clears_at.min(give_up_at) - now;
            let _ = time.timeout(wait, self.inbound.stale_arrived()).await;
        }
    }

    /// Wait for the response bytes of `exchange`.
    async fn await_response(
        &self,
        slot: &mut ExchangeSlot,
        exchange: &PendingExchange,
    ) -> ExchangeResult<Vec<u8>> {
        let time = self.providers.time();

        let mut response = loop {
            let remaining = exchange.remaining(time.now());
            let chunk = match time.timeout(remaining, slot.chunk_rx.recv()).await {
                Err(TimeError::Elapsed) => {
                    return Err(ExchangeError::Timeout {
                        after: self.config.request_timeout,
                    });
                }
                Ok(None) => return Err(ExchangeError::closed()),
                Ok(Some(chunk)) => chunk,
            };

            if chunk.generation != exchange.generation {
                self.discard(&chunk);
                continue;
            }

            match chunk.result {
                Ok(bytes) if bytes.is_empty() => return Err(ExchangeError::NoResponse),
                Ok(bytes) => break bytes,
                Err(source) => {
                    return Err(ExchangeError::Transport {
                        context: "read",
                        source,
                    });
                }
            }
        };

        if self.config.response_coalesce.is_zero() {
            return Ok(response);
        }

        // Gather the rest of a response split over several reads.
        loop {
            let remaining = exchange.remaining(time.now());
            if remaining.is_zero() {
                break;
            }
            let window = remaining.min(self.config.response_coalesce);
            match time.timeout(window, slot.chunk_rx.recv()).await {
                Ok(Some(chunk)) if chunk.generation != exchange.generation => {
                    self.discard(&chunk);
                }
                Ok(Some(chunk)) => match chunk.result {
                    Ok(bytes) if bytes.is_empty() => break,
                    Ok(bytes) => response.extend_from_slice(&bytes),
                    Err(source) => {
                        return Err(ExchangeError::Transport {
                            context: "read",
                            source,
                        });
                    }
                },
                Ok(None) => return Err(ExchangeError::closed()),
                // Quiet window elapsed.
                Err(_) => break,
            }
        }

        Ok(response)
    }

    fn discard(&self, chunk: &InboundChunk) {
        tracing::debug!(
            "RequestCoordinator: discarding chunk from generation {}",
            chunk.generation
        );
        self.metrics.borrow_mut().stale_chunks_discarded += 1;
    }
}
