use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

/// Point-in-time counters for one policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Permits (or tokens) that could be handed out right now.
    pub available_permits: usize,
    /// Callers currently parked in the wait queue.
    pub queued: usize,
    /// Requests admitted since the policy was created, including queued ones.
    pub total_admitted: u64,
    /// Requests rejected since the policy was created, including evictions.
    pub total_rejected: u64,
}

/// Running totals shared by every strategy.
#[derive(Debug, Default)]
pub(crate) struct Tally {
    admitted: AtomicU64,
    rejected: AtomicU64,
}

impl Tally {
    pub(crate) fn admitted(&self, count: usize) {
        self.admitted.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Takes back an admission whose slot was never used.
    pub(crate) fn revoked(&self) {
        let _ = self
            .admitted
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |val| val.checked_sub(1));
    }

    pub(crate) fn rejected(&self, count: usize) {
        self.rejected.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, available_permits: usize, queued: usize) -> Statistics {
        Statistics {
            available_permits,
            queued,
            total_admitted: self.admitted.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}
