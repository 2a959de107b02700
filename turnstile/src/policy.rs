use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::time::Instant;

use crate::ConcurrencyLimit;
use crate::FixedWindow;
use crate::Permit;
use crate::Reason;
use crate::SlidingWindow;
use crate::Statistics;
use crate::Strategy;
use crate::TokenBucket;
use crate::queue::Waiter;

/// Outcome of an acquisition that may park the caller.
#[derive(Debug)]
pub enum Acquisition {
    /// Admitted immediately.
    Admitted(Permit),
    /// Parked until a slot frees up; await the [`Waiter`] to learn the outcome.
    Queued(Waiter),
    /// Turned away without queueing.
    Rejected(Reason),
}

/// The kind of algorithm behind a [`Policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    FixedWindow,
    SlidingWindow,
    TokenBucket,
    Concurrency,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PolicyKind::FixedWindow => "fixed_window",
            PolicyKind::SlidingWindow => "sliding_window",
            PolicyKind::TokenBucket => "token_bucket",
            PolicyKind::Concurrency => "concurrency",
        })
    }
}

/// One configured limiter, owning its own counters.
///
/// Window strategies are held in an `Arc` because parked callers keep a handle to
/// the strategy they wait on.
#[derive(Debug)]
pub enum Policy {
    FixedWindow(Arc<FixedWindow>),
    SlidingWindow(Arc<SlidingWindow>),
    TokenBucket(TokenBucket),
    Concurrency(ConcurrencyLimit),
}

impl Policy {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Policy::FixedWindow(_) => PolicyKind::FixedWindow,
            Policy::SlidingWindow(_) => PolicyKind::SlidingWindow,
            Policy::TokenBucket(_) => PolicyKind::TokenBucket,
            Policy::Concurrency(_) => PolicyKind::Concurrency,
        }
    }

    fn strategy(&self) -> &dyn Strategy {
        match self {
            Policy::FixedWindow(limiter) => limiter.as_ref(),
            Policy::SlidingWindow(limiter) => limiter.as_ref(),
            Policy::TokenBucket(limiter) => limiter,
            Policy::Concurrency(limiter) => limiter,
        }
    }

    /// Attempts to admit a request at `now`, parking it if the policy has a queue
    /// with room.
    pub fn acquire_at(&self, now: Instant) -> Acquisition {
        match self {
            Policy::FixedWindow(limiter) => limiter.acquire_at(now),
            Policy::SlidingWindow(limiter) => limiter.acquire_at(now),
            Policy::TokenBucket(_) | Policy::Concurrency(_) => match self.process_at(now) {
                ControlFlow::Continue(permit) => Acquisition::Admitted(permit),
                ControlFlow::Break(reason) => Acquisition::Rejected(reason),
            },
        }
    }

    /// Admits a request, waiting in the queue when the policy has one.
    ///
    /// Dropping the returned future gives up the queue slot.
    pub async fn acquire(&self) -> Result<Permit, Reason> {
        match self.acquire_at(Instant::now()) {
            Acquisition::Admitted(permit) => Ok(permit),
            Acquisition::Queued(waiter) => waiter.await,
            Acquisition::Rejected(reason) => Err(reason),
        }
    }
}

impl From<FixedWindow> for Policy {
    fn from(limiter: FixedWindow) -> Self {
        Policy::FixedWindow(Arc::new(limiter))
    }
}

impl From<SlidingWindow> for Policy {
    fn from(limiter: SlidingWindow) -> Self {
        Policy::SlidingWindow(Arc::new(limiter))
    }
}

impl From<TokenBucket> for Policy {
    fn from(limiter: TokenBucket) -> Self {
        Policy::TokenBucket(limiter)
    }
}

impl From<ConcurrencyLimit> for Policy {
    fn from(limiter: ConcurrencyLimit) -> Self {
        Policy::Concurrency(limiter)
    }
}

impl Strategy for Policy {
    #[inline]
    fn process_at(&self, now: Instant) -> ControlFlow<Reason, Permit> {
        self.strategy().process_at(now)
    }

    fn statistics(&self) -> Statistics {
        self.strategy().statistics()
    }
}
