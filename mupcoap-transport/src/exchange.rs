//! Per-request bookkeeping.

use std::fmt;
use std::time::Duration;

use mupcoap_core::{CoapRequest, Method};
use serde::{Deserialize, Serialize};

use crate::ExchangeError;

/// Where the most recent exchange is in its lifecycle.
///
/// ```text
/// Idle -> ModePending -> Sent -> Resolved
///                              | TimedOut
///                              | NoResponse
///                              | TransportFailed
///                              | DecodeFailed
/// ```
///
/// Terminal phases are final; retrying is up to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangePhase {
    /// No exchange has run yet.
    Idle,
    /// Waiting for the stream to enter raw CoAP mode.
    ModePending,
    /// Request written, waiting for the response.
    Sent,
    /// Response decoded and returned.
    Resolved,
    /// No response before the deadline.
    TimedOut,
    /// The stream returned an empty read.
    NoResponse,
    /// Mode switch, write or read failed.
    TransportFailed,
    /// The response did not decode.
    DecodeFailed,
}

impl ExchangePhase {
    /// Whether the phase ends an exchange.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            ExchangePhase::Idle | ExchangePhase::ModePending | ExchangePhase::Sent
        )
    }

    /// Terminal phase for a failed exchange.
    ///
    /// `None` for [`ExchangeError::Busy`]: a rejected `try_send` never
    /// started an exchange.
    pub fn from_error(error: &ExchangeError) -> Option<Self> {
        match error {
            ExchangeError::Timeout { .. } => Some(ExchangePhase::TimedOut),
            ExchangeError::NoResponse => Some(ExchangePhase::NoResponse),
            ExchangeError::Transport { .. } => Some(ExchangePhase::TransportFailed),
            ExchangeError::Decode(_) => Some(ExchangePhase::DecodeFailed),
            ExchangeError::Busy => None,
        }
    }
}

impl fmt::Display for ExchangePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangePhase::Idle => "idle",
            ExchangePhase::ModePending => "mode-pending",
            ExchangePhase::Sent => "sent",
            ExchangePhase::Resolved => "resolved",
            ExchangePhase::TimedOut => "timed-out",
            ExchangePhase::NoResponse => "no-response",
            ExchangePhase::TransportFailed => "transport-failed",
            ExchangePhase::DecodeFailed => "decode-failed",
        };
        f.write_str(name)
    }
}

/// The request currently waiting for a response.
#[derive(Debug, Clone)]
pub(crate) struct PendingExchange {
    pub generation: u64,
    pub method: Method,
    pub path: String,
    /// Provider time at which the request finished writing.
    pub dispatched_at: Duration,
    /// Provider time after which the exchange times out.
    pub deadline: Duration,
}

impl PendingExchange {
    /// Record a request that was just written at `now`.
    pub fn dispatched(
        generation: u64,
        request: &CoapRequest<'_>,
        now: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            generation,
            method: request.method,
            path: request.path.to_string(),
            dispatched_at: now,
            deadline: now + timeout,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self, now: Duration) -> Duration {
        self.deadline.saturating_sub(now)
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.dispatched_at)
    }
}
