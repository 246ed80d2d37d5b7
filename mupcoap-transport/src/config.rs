//! Configuration for a CoAP session over the shared serial stream.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Control-channel command that switches the device from MUP1 framing to
/// raw CoAP.
pub const COAP_MODE_COMMAND: &[u8] = b">c\n";

/// Configuration for mode switching and request/response timing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bytes written once to put the device into raw CoAP mode.
    pub mode_switch_command: Vec<u8>,

    /// Time to wait after the mode-switch command before sending CoAP.
    ///
    /// The device does not acknowledge the switch, so this is a fixed wait.
    pub settle_delay: Duration,

    /// Maximum time to wait for a response after the request is written.
    pub request_timeout: Duration,

    /// Quiet window used to gather a response split across several reads.
    ///
    /// `Duration::ZERO` disables coalescing: the first non-empty chunk is
    /// the whole response.
    pub response_coalesce: Duration,

    /// Pause between reads after the stream reported "nothing yet" or a
    /// transient error.
    pub idle_poll_interval: Duration,

    /// How long after an unanswered request's deadline its reply is still
    /// expected. Until then, or until the late reply has been dropped, no
    /// new request is written.
    ///
    /// Defaults to the request timeout.
    pub late_response_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode_switch_command: COAP_MODE_COMMAND.to_vec(),
            settle_delay: Duration::from_millis(100),
            request_timeout: Duration::from_secs(5),
            response_coalesce: Duration::ZERO,
            idle_poll_interval: Duration::from_millis(10),
            late_response_grace: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    /// Create a configuration with the given timeout and settle delay.
    ///
    /// The late-response grace follows the timeout.
    pub fn new(request_timeout: Duration, settle_delay: Duration) -> Self {
        Self {
            request_timeout,
            settle_delay,
            late_response_grace: request_timeout,
            ..Self::default()
        }
    }

    /// Use a different mode-switch command.
    pub fn with_mode_switch_command(mut self, command: impl Into<Vec<u8>>) -> Self {
        self.mode_switch_command = command.into();
        self
    }

    /// Gather multi-chunk responses using the given quiet window.
    pub fn with_response_coalesce(mut self, window: Duration) -> Self {
        self.response_coalesce = window;
        self
    }

    /// Set the pause between reads when the stream is idle.
    pub fn with_idle_poll_interval(mut self, interval: Duration) -> Self {
        self.idle_poll_interval = interval;
        self
    }

    /// Set how long a request waits for a timed-out predecessor's late reply.
    pub fn with_late_response_grace(mut self, grace: Duration) -> Self {
        self.late_response_grace = grace;
        self
    }

    /// Short timings for loopback links and tests.
    pub fn fast_local() -> Self {
        Self {
            mode_switch_command: COAP_MODE_COMMAND.to_vec(),
            settle_delay: Duration::from_millis(10),
            request_timeout: Duration::from_millis(500),
            response_coalesce: Duration::ZERO,
            idle_poll_interval: Duration::from_millis(1),
            late_response_grace: Duration::from_millis(500),
        }
    }
}
