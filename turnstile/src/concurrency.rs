use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::Permit;
use crate::Reason;
use crate::Statistics;
use crate::Strategy;
use crate::statistics::Tally;

/// Bounds in-flight work rather than throughput.
///
/// Each admission hands out a [`Permit`] that owns one semaphore slot. The slot is
/// released when the permit is dropped, whether the guarded operation succeeds,
/// fails or is cancelled, so a release can never happen without an acquisition.
#[derive(Debug)]
pub struct ConcurrencyLimit {
    permit_limit: usize,
    semaphore: Arc<Semaphore>,
    tally: Tally,
}

impl ConcurrencyLimit {
    /// Creates a limit of `permit_limit` concurrent permits, capped at
    /// [`Semaphore::MAX_PERMITS`].
    pub fn new(permit_limit: NonZeroUsize) -> Self {
        let permit_limit = permit_limit.get().min(Semaphore::MAX_PERMITS);
        Self {
            permit_limit,
            semaphore: Arc::new(Semaphore::new(permit_limit)),
            tally: Tally::default(),
        }
    }

    /// Number of permits currently held.
    pub fn held(&self) -> usize {
        self.permit_limit - self.semaphore.available_permits()
    }
}

impl Strategy for ConcurrencyLimit {
    fn process_at(&self, _now: Instant) -> ControlFlow<Reason, Permit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(slot) => {
                self.tally.admitted(1);
                ControlFlow::Continue(Permit::held(slot))
            }
            Err(_) => {
                self.tally.rejected(1);
                ControlFlow::Break(Reason::Overloaded { retry_after: None })
            }
        }
    }

    fn statistics(&self) -> Statistics {
        self.tally.snapshot(self.semaphore.available_permits(), 0)
    }
}
