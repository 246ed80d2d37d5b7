//! # mupcoap-transport
//!
//! CoAP over a serial stream shared with the MUP1 control channel.
//!
//! This crate provides:
//! - **ModeController**: one-time, single-flight switch from MUP1 framing to
//!   raw CoAP
//! - **RequestCoordinator**: serialized request/response exchanges with a
//!   timeout, and late responses kept away from later requests
//! - **SessionConfig** / **SessionMetrics**: timing knobs and counters
//!
//! ```rust,no_run
//! use mupcoap_core::{CoapCodec, CoapRequest, CodecError, Method, TokioDuplexStream, TokioProviders};
//! use mupcoap_transport::{RequestCoordinator, SessionConfig};
//!
//! #[derive(Clone)]
//! struct MyCodec;
//!
//! impl CoapCodec for MyCodec {
//!     type Response = Vec<u8>;
//!     fn encode(&self, request: &CoapRequest<'_>) -> Vec<u8> {
//!         request.path.as_bytes().to_vec()
//!     }
//!     fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, CodecError> {
//!         Ok(bytes.to_vec())
//!     }
//! }
//!
//! # async fn run(port: tokio::io::DuplexStream) {
//! let coordinator = RequestCoordinator::new(
//!     TokioProviders::new(),
//!     TokioDuplexStream::new(port),
//!     MyCodec,
//!     SessionConfig::default(),
//! );
//! let _interfaces = coordinator
//!     .send(Method::Get, "/ietf-interfaces:interfaces", None)
//!     .await;
//! # }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core types for convenience
pub use mupcoap_core::{
    CoapCodec, CoapRequest, CodecError, DuplexStream, Method, Providers, TaskProvider,
    TimeProvider, TokioDuplexStream, TokioProviders, TokioTaskProvider, TokioTimeProvider,
};

/// Session configuration.
pub mod config;

/// Error types for exchanges.
pub mod error;

/// Exchange lifecycle phases.
pub mod exchange;

/// Session counters.
pub mod metrics;

/// Transport mode arbitration.
pub mod mode;

mod coordinator;
mod reader;

pub use config::{COAP_MODE_COMMAND, SessionConfig};
pub use coordinator::RequestCoordinator;
pub use error::{ExchangeError, ExchangeResult};
pub use exchange::ExchangePhase;
pub use metrics::SessionMetrics;
pub use mode::{ModeController, TransportMode};
