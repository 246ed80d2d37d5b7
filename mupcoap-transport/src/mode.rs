//! Transport mode arbitration for the shared serial stream.
//!
//! The device starts in MUP1 framed mode. Before any CoAP bytes go out, a
//! one-time control command switches it to raw CoAP. The device never
//! acknowledges the switch, so the controller waits a fixed settle delay
//! before declaring the stream ready.
//!
//! # Transition
//!
//! ```text
//! ┌────────┐  first caller   ┌───────────┐  write ok + settle  ┌─────────┐
//! │ Framed ├────────────────►│ Switching ├────────────────────►│ RawCoap │
//! └────────┘                 └─────┬─────┘                     └─────────┘
//!      ▲                           │
//!      └───────────────────────────┘
//!        write failed / leader dropped
//! ```
//!
//! Callers arriving while the state is `Switching` wait on the leader's
//! outcome instead of writing the command again.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use mupcoap_core::{DuplexStream, TimeProvider};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{ExchangeError, ExchangeResult, SessionConfig};

/// Framing regime currently in effect on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    /// Line-framed MUP1 control channel (power-on default).
    Framed,
    /// Raw binary CoAP.
    RawCoap,
}

/// Outcome published by the switching caller; `None` until it finishes.
type SwitchOutcome = Option<ExchangeResult<()>>;

enum ModeState {
    Framed,
    Switching(watch::Receiver<SwitchOutcome>),
    RawCoap,
}

/// Owns the transport mode of one stream and performs the switch to raw
/// CoAP at most once.
pub struct ModeController<S: DuplexStream, T: TimeProvider> {
    stream: Rc<S>,
    time: T,
    command: Vec<u8>,
    settle_delay: Duration,
    state: RefCell<ModeState>,
    attempts: Cell<u64>,
    failures: Cell<u64>,
}

impl<S: DuplexStream, T: TimeProvider> ModeController<S, T> {
    /// Create a controller for `stream`, starting in framed mode.
    pub fn new(stream: Rc<S>, time: T, command: Vec<u8>, settle_delay: Duration) -> Self {
        Self {
            stream,
            time,
            command,
            settle_delay,
            state: RefCell::new(ModeState::Framed),
            attempts: Cell::new(0),
            failures: Cell::new(0),
        }
    }

    /// Create a controller using the command and settle delay from `config`.
    pub fn from_config(stream: Rc<S>, time: T, config: &SessionConfig) -> Self {
        Self::new(
            stream,
            time,
            config.mode_switch_command.clone(),
            config.settle_delay,
        )
    }

    /// Current mode. A switch in progress still reports `Framed`.
    pub fn mode(&self) -> TransportMode {
        match &*self.state.borrow() {
            ModeState::RawCoap => TransportMode::RawCoap,
            ModeState::Framed | ModeState::Switching(_) => TransportMode::Framed,
        }
    }

    /// Number of mode-switch commands written so far.
    pub fn switch_attempts(&self) -> u64 {
        self.attempts.get()
    }

    /// Number of mode-switch commands whose write failed.
    pub fn switch_failures(&self) -> u64 {
        self.failures.get()
    }

    /// Make sure the stream is in raw CoAP mode.
    ///
    /// Returns immediately once the mode is `RawCoap`. Otherwise the first
    /// caller writes the command and waits the settle delay; concurrent
    /// callers wait for that caller and receive its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Transport`] if writing the command failed.
    /// The mode stays `Framed` so the next call retries.
    pub async fn ensure_coap_mode(&self) -> ExchangeResult<()> {
        loop {
            let in_progress = match &*self.state.borrow() {
                ModeState::RawCoap => return Ok(()),
                ModeState::Switching(rx) => Some(rx.clone()),
                ModeState::Framed => None,
            };

            let Some(mut rx) = in_progress else {
                return self.switch_to_coap().await;
            };

            tracing::trace!("ModeController: waiting for in-progress mode switch");
            let outcome = rx.wait_for(Option::is_some).await.map(|v| (*v).clone());
            match outcome {
                Ok(Some(result)) => return result,
                // The switching caller was dropped before finishing. Its guard
                // already put the state back to Framed, so try again.
                Ok(None) | Err(_) => {
                    tracing::debug!("ModeController: mode switch abandoned, retrying");
                }
            }
        }
    }

    async fn switch_to_coap(&self) -> ExchangeResult<()> {
        let (tx, rx) = watch::channel(None);
        *self.state.borrow_mut() = ModeState::Switching(rx);
        let mut guard = SwitchGuard {
            state: &self.state,
            armed: true,
        };

        self.attempts.set(self.attempts.get() + 1);
        tracing::debug!(
            "ModeController: writing mode switch command ({} bytes)",
            self.command.len()
        );

        let result = match self.stream.write(&self.command).await {
            Ok(()) => {
                self.time.sleep(self.settle_delay).await;
                Ok(())
            }
            Err(e) => Err(ExchangeError::transport("mode switch", e)),
        };

        guard.armed = false;
        *self.state.borrow_mut() = match &result {
            Ok(()) => {
                tracing::debug!("ModeController: raw CoAP mode active");
                ModeState::RawCoap
            }
            Err(e) => {
                self.failures.set(self.failures.get() + 1);
                tracing::warn!("ModeController: mode switch failed: {}", e);
                ModeState::Framed
            }
        };
        tx.send_replace(Some(result.clone()));
        result
    }
}

/// Restores `Framed` if the switching future is dropped before it finishes.
struct SwitchGuard<'a> {
    state: &'a RefCell<ModeState>,
    armed: bool,
}

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.state.borrow_mut() = ModeState::Framed;
        }
    }
}
