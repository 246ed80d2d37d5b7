//! Counters for mode switches and exchanges on a session.

use std::time::Duration;

use serde::Serialize;

use crate::ExchangeError;

/// Snapshot of session activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionMetrics {
    /// Mode-switch commands written (successful or not)
    pub mode_switch_attempts: u64,

    /// Mode-switch commands whose write failed
    pub mode_switch_failures: u64,

    /// Requests written to the stream
    pub requests_sent: u64,

    /// Responses decoded and handed back to callers
    pub responses_received: u64,

    /// Exchanges that ended with a timeout
    pub timeouts: u64,

    /// Exchanges that ended with an empty read
    pub empty_responses: u64,

    /// Exchanges that ended with a transport failure
    pub transport_errors: u64,

    /// Exchanges whose response failed to decode
    pub decode_errors: u64,

    /// Inbound chunks that arrived outside of the exchange they could belong to
    pub stale_chunks_discarded: u64,

    /// Total request bytes written
    pub bytes_sent: u64,

    /// Total response bytes handed to the codec
    pub bytes_received: u64,

    /// Time from request write to response of the last successful exchange
    pub last_round_trip: Option<Duration>,
}

impl SessionMetrics {
    /// Record a request written to the stream.
    pub fn record_request_sent(&mut self, bytes: usize) {
        self.requests_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Record a decoded response.
    pub fn record_response(&mut self, bytes: usize, round_trip: Duration) {
        self.responses_received += 1;
        self.bytes_received += bytes as u64;
        self.last_round_trip = Some(round_trip);
    }

    /// Record a failed exchange under the matching counter.
    pub fn record_failure(&mut self, error: &ExchangeError) {
        match error {
            ExchangeError::Timeout { .. } => self.timeouts += 1,
            ExchangeError::NoResponse => self.empty_responses += 1,
            ExchangeError::Transport { .. } => self.transport_errors += 1,
            ExchangeError::Decode(_) => self.decode_errors += 1,
            ExchangeError::Busy => {}
        }
    }

    /// Exchanges that reached a terminal state.
    pub fn completed_exchanges(&self) -> u64 {
        self.responses_received
            + self.timeouts
            + self.empty_responses
            + self.transport_errors
            + self.decode_errors
    }
}
