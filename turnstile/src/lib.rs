//! # turnstile
//!
//! `turnstile` decides, per named policy, whether an incoming request is admitted,
//! queued or rejected.
//!
//! ## Strategies
//!
//! * [`FixedWindow`]: counts permits in consecutive windows, optionally queueing
//!   callers until the next window opens.
//! * [`SlidingWindow`]: counts permits in a ring of segments covering the trailing
//!   window, which removes the boundary burst of a fixed window.
//! * [`TokenBucket`]: tokens replenish at a fixed rate and are spent per request.
//! * [`ConcurrencyLimit`]: bounds in-flight work; the [`Permit`] releases on drop.
//!
//! ## Key Concepts
//!
//! * **Lazy Evaluation**: windows and tokens are recalculated at the moment of the
//!   request, so no background worker threads or timers are needed.
//! * **Explicit Time**: every decision has an `_at(now)` form taking a
//!   [`tokio::time::Instant`], which keeps decisions deterministic under test.
//! * **Strategy Trait**: a unified interface for the different limiting algorithms.
//! * **Registry**: [`PolicyRegistry`] maps policy names to [`Policy`] instances and is
//!   built once from [`PolicyConfig`] at startup.
//!
//! ## Example
//!
//! ```rust
//! use std::num::NonZeroUsize;
//! use std::time::Duration;
//!
//! use turnstile::Strategy;
//! use turnstile::TokenBucket;
//!
//! let limit = NonZeroUsize::new(10).unwrap();
//! let bucket = TokenBucket::new(limit, 10, Duration::from_secs(10));
//!
//! if bucket.process().is_continue() {
//!     // Request allowed
//! }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::time::Instant;

mod concurrency;
mod config;
mod error;
mod fixed_window;
mod permit;
mod policy;
mod queue;
mod registry;
mod sliding_window;
mod statistics;
mod token_bucket;

pub use concurrency::ConcurrencyLimit;
pub use config::PolicyConfig;
pub use config::duration_format;
pub use error::ConfigError;
pub use fixed_window::FixedWindow;
pub use permit::Permit;
pub use policy::Acquisition;
pub use policy::Policy;
pub use policy::PolicyKind;
pub use queue::QueueOrder;
pub use queue::Waiter;
pub use registry::PolicyRegistry;
pub use registry::RegistryBuilder;
pub use sliding_window::MAX_SEGMENTS_PER_WINDOW;
pub use sliding_window::SlidingWindow;
pub use statistics::Statistics;
pub use token_bucket::TokenBucket;

/// Reasons why a request might be rejected by a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// No capacity and no free queue slot.
    ///
    /// `retry_after` is set when the strategy knows when capacity frees up.
    Overloaded { retry_after: Option<Duration> },
    /// The request was queued and then displaced by a newer one.
    Evicted,
}

impl Reason {
    /// The retry hint carried by this rejection, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Reason::Overloaded { retry_after } => *retry_after,
            Reason::Evicted => None,
        }
    }
}

/// The core trait for all limiting algorithms.
///
/// Strategies are `Send` and `Sync` so they can be shared across threads via `Arc`.
/// `process_at` never queues: when a strategy has waiters, new arrivals are
/// rejected rather than allowed to overtake them.
pub trait Strategy: Debug + Send + Sync {
    /// Attempts to admit a single request at `now`.
    ///
    /// The update and the decision happen as one atomic step.
    fn process_at(&self, now: Instant) -> ControlFlow<Reason, Permit>;

    /// Attempts to admit a single request at the current time.
    fn process(&self) -> ControlFlow<Reason, Permit> {
        self.process_at(Instant::now())
    }

    /// A snapshot of the strategy's counters as of its last decision.
    fn statistics(&self) -> Statistics;
}
