//! # mupcoap-core
//!
//! Core abstractions for carrying CoAP over a MUP1 serial link.
//!
//! - **Provider traits**: [`TimeProvider`] and [`TaskProvider`], bundled by
//!   [`Providers`], so timing-sensitive code runs the same on a real or a
//!   paused Tokio clock
//! - **Stream seam**: [`DuplexStream`] plus the [`TokioDuplexStream`]
//!   adapter for serial ports and other Tokio I/O types
//! - **Codec seam**: [`CoapCodec`] and the request types it encodes

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod providers;
mod stream;
mod task;
mod time;

// Codec exports
pub use codec::{CoapCodec, CoapRequest, CodecError, Method, UnknownMethod};

// Provider trait exports
pub use providers::{Providers, TokioProviders};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};

// Stream exports
pub use stream::{
    DEFAULT_READ_BUFFER_SIZE, DuplexStream, TokioDuplexStream, is_fatal_stream_error,
};
