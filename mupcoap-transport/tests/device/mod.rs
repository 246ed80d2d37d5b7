//! Scripted device for coordinator tests.
//!
//! `MockDevice` stands in for the serial port: it records every write with
//! the (paused) clock time it happened at, and answers each CoAP request
//! with the next scripted [`Reply`]. The mode-switch command is recorded but
//! never answered, like the real device.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use mupcoap_transport::{
    COAP_MODE_COMMAND, CoapCodec, CoapRequest, CodecError, DuplexStream, RequestCoordinator,
    SessionConfig, TokioProviders,
};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;

type Inbound = io::Result<Vec<u8>>;

/// What the device sends back for one request.
pub struct Reply {
    steps: Vec<(Duration, Inbound)>,
}

impl Reply {
    /// Answer with `bytes` after `delay`.
    pub fn after(delay: Duration, bytes: &[u8]) -> Self {
        Self {
            steps: vec![(delay, Ok(bytes.to_vec()))],
        }
    }

    /// Answer with an empty read after `delay`.
    pub fn empty(delay: Duration) -> Self {
        Self {
            steps: vec![(delay, Ok(Vec::new()))],
        }
    }

    /// Fail the read with `kind` after `delay`.
    pub fn error(delay: Duration, kind: io::ErrorKind) -> Self {
        Self {
            steps: vec![(delay, Err(io::Error::new(kind, "device error")))],
        }
    }

    /// Never answer.
    pub fn silent() -> Self {
        Self { steps: Vec::new() }
    }

    /// Answer in several reads; each delay counts from the previous chunk.
    pub fn chunks(chunks: Vec<(Duration, &[u8])>) -> Self {
        Self {
            steps: chunks
                .into_iter()
                .map(|(delay, bytes)| (delay, Ok(bytes.to_vec())))
                .collect(),
        }
    }

    /// Follow up with a failed read `delay` after the previous step.
    pub fn then_error(mut self, delay: Duration, kind: io::ErrorKind) -> Self {
        self.steps
            .push((delay, Err(io::Error::new(kind, "device error"))));
        self
    }
}

/// In-memory serial device.
pub struct MockDevice {
    started: Instant,
    writes: RefCell<Vec<(Duration, Vec<u8>)>>,
    replies: RefCell<VecDeque<Reply>>,
    fail_writes: Cell<u32>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Inbound>>,
}

impl MockDevice {
    pub fn new() -> Rc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Rc::new(Self {
            started: Instant::now(),
            writes: RefCell::new(Vec::new()),
            replies: RefCell::new(VecDeque::new()),
            fail_writes: Cell::new(0),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
        })
    }

    /// Queue the answer to the next unanswered request.
    pub fn reply(&self, reply: Reply) {
        self.replies.borrow_mut().push_back(reply);
    }

    /// Fail the next `count` writes with `BrokenPipe`.
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_writes.set(count);
    }

    /// Deliver bytes nobody asked for.
    pub fn push_unsolicited(&self, bytes: &[u8]) {
        let _ = self.inbound_tx.send(Ok(bytes.to_vec()));
    }

    /// Make the next read report end of stream.
    pub fn unplug(&self) {
        let _ = self.inbound_tx.send(Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "device unplugged",
        )));
    }

    /// Successful writes, as text.
    pub fn written(&self) -> Vec<String> {
        self.writes
            .borrow()
            .iter()
            .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Time since creation at which each successful write happened.
    pub fn write_times(&self) -> Vec<Duration> {
        self.writes.borrow().iter().map(|(at, _)| *at).collect()
    }

    fn schedule(&self, reply: Reply) {
        let tx = self.inbound_tx.clone();
        tokio::task::spawn_local(async move {
            for (delay, result) in reply.steps {
                tokio::time::sleep(delay).await;
                if tx.send(result).is_err() {
                    return;
                }
            }
        });
    }
}

#[async_trait(?Send)]
impl DuplexStream for MockDevice {
    async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        tokio::task::yield_now().await;
        if self.fail_writes.get() > 0 {
            self.fail_writes.set(self.fail_writes.get() - 1);
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "port closed"));
        }

        self.writes
            .borrow_mut()
            .push((self.started.elapsed(), bytes.to_vec()));

        if bytes != COAP_MODE_COMMAND {
            let reply = self.replies.borrow_mut().pop_front();
            if let Some(reply) = reply {
                self.schedule(reply);
            }
        }
        Ok(())
    }

    async fn read(&self) -> io::Result<Vec<u8>> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(result) => result,
            None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed")),
        }
    }
}

/// Human-readable stand-in for a CoAP codec: `"GET /path payload"` out,
/// UTF-8 text in.
#[derive(Clone, Debug, Default)]
pub struct TextCodec;

impl CoapCodec for TextCodec {
    type Response = String;

    fn encode(&self, request: &CoapRequest<'_>) -> Vec<u8> {
        let mut bytes = format!("{} {}", request.method, request.path).into_bytes();
        if let Some(payload) = request.payload {
            bytes.push(b' ');
            bytes.extend_from_slice(payload);
        }
        bytes
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, CodecError> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| CodecError::Malformed(format!("response is not text: {}", e)))
    }
}

pub type TestCoordinator = RequestCoordinator<TokioProviders, MockDevice, TextCodec>;

/// Build a coordinator over `device`. Must be called inside a `LocalSet`.
pub fn coordinator(device: &Rc<MockDevice>, config: SessionConfig) -> TestCoordinator {
    init_tracing();
    RequestCoordinator::with_shared_stream(TokioProviders::new(), device.clone(), TextCodec, config)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}
