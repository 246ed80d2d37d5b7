//! Error types for CoAP exchanges.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use mupcoap_core::CodecError;

/// Outcome of a failed exchange or mode switch.
///
/// `Clone` so that a single mode-switch failure can be handed to every
/// caller waiting on it; I/O causes are shared through an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExchangeError {
    /// Writing to or reading from the stream failed.
    #[error("transport error during {context}: {source}")]
    Transport {
        /// Which step failed (`"mode switch"`, `"write"`, `"read"`).
        context: &'static str,
        /// Underlying I/O error.
        source: Arc<io::Error>,
    },

    /// No response arrived within the request timeout.
    #[error("no response within {after:?}")]
    Timeout {
        /// The configured timeout that elapsed.
        after: Duration,
    },

    /// The stream returned an empty read where a response was expected.
    #[error("no response received")]
    NoResponse,

    /// The response bytes were rejected by the codec.
    #[error("failed to decode response: {0}")]
    Decode(#[from] CodecError),

    /// Another exchange is in flight and the caller asked not to wait.
    #[error("an exchange is already in flight")]
    Busy,
}

impl ExchangeError {
    /// Wrap an I/O error raised during `context`.
    pub fn transport(context: &'static str, error: io::Error) -> Self {
        ExchangeError::Transport {
            context,
            source: Arc::new(error),
        }
    }

    /// The inbound side of the stream has shut down.
    pub fn closed() -> Self {
        Self::transport(
            "read",
            io::Error::new(io::ErrorKind::BrokenPipe, "inbound stream closed"),
        )
    }

    /// Whether the device simply did not answer.
    ///
    /// Callers generally treat an empty read the same way as a timeout.
    pub fn is_no_answer(&self) -> bool {
        matches!(self, ExchangeError::Timeout { .. } | ExchangeError::NoResponse)
    }

    /// The underlying I/O error kind, for transport failures.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            ExchangeError::Transport { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// Result type for exchanges.
pub type ExchangeResult<T> = Result<T, ExchangeError>;
