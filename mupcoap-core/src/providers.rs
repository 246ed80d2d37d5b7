//! Provider bundle trait for simplified type parameters.
//!
//! Components that need both a clock and a task spawner take a single
//! `P: Providers` parameter instead of one parameter per provider:
//!
//! ```text
//! struct RequestCoordinator<P: Providers, S, C>
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use mupcoap_core::{Providers, TimeProvider, TokioProviders};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let providers = TokioProviders::new();
//! let _elapsed = providers.time().now();
//! # }
//! ```

use crate::{TaskProvider, TimeProvider, TokioTaskProvider, TokioTimeProvider};

/// Bundle of the provider types for a runtime environment.
///
/// Associated types keep the concrete providers visible at compile time,
/// so there is no dynamic dispatch on the hot path.
pub trait Providers: Clone + 'static {
    /// Time provider type for sleep, timeout, and time queries.
    type Time: TimeProvider + Clone + 'static;

    /// Task provider type for spawning local tasks.
    type Task: TaskProvider + Clone + 'static;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;
}

/// Production providers using the Tokio runtime.
#[derive(Clone, Debug, Default)]
pub struct TokioProviders {
    time: TokioTimeProvider,
    task: TokioTaskProvider,
}

impl TokioProviders {
    /// Create a new production providers bundle.
    pub fn new() -> Self {
        Self {
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
        }
    }
}

impl Providers for TokioProviders {
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }
}
