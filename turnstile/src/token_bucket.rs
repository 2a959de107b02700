use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use super::Permit;
use super::Reason;
use super::Statistics;
use super::Strategy;
use crate::statistics::Tally;

/// Tokens accumulate at a fixed rate up to a capacity and each request spends one.
///
/// The bucket starts full. Bursts beyond the current token count are rejected, never
/// delayed.
#[derive(Debug)]
pub struct TokenBucket {
    token_limit: usize,
    tokens_per_period: usize,
    period_ns: u64,
    state: Mutex<BucketState>,
    tally: Tally,
}

#[derive(Debug)]
struct BucketState {
    tokens: usize,
    last_replenishment: Instant,
}

impl Strategy for TokenBucket {
    fn process_at(&self, now: Instant) -> ControlFlow<Reason, Permit> {
        let mut state = self.state.lock();
        self.replenish(&mut state, now);

        if state.tokens == 0 {
            self.tally.rejected(1);
            let next = state.last_replenishment + Duration::from_nanos(self.period_ns);
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Some(next.saturating_duration_since(now)),
            })
        } else {
            state.tokens -= 1;
            self.tally.admitted(1);
            ControlFlow::Continue(Permit::detached())
        }
    }

    fn statistics(&self) -> Statistics {
        self.tally.snapshot(self.state.lock().tokens, 0)
    }
}

impl TokenBucket {
    /// Creates a new `TokenBucket` strategy.
    ///
    /// # Arguments
    ///
    /// * `token_limit` - Capacity of the bucket, which also starts full.
    /// * `tokens_per_period` - Tokens added at every replenishment tick.
    /// * `period` - Time between replenishment ticks.
    pub fn new(token_limit: NonZeroUsize, tokens_per_period: usize, period: Duration) -> Self {
        Self {
            token_limit: token_limit.get(),
            tokens_per_period,
            period_ns: (period.as_nanos() as u64).max(1),
            state: Mutex::new(BucketState {
                tokens: token_limit.get(),
                last_replenishment: Instant::now(),
            }),
            tally: Tally::default(),
        }
    }

    /// Counts replenishment ticks from `start` instead of construction time.
    pub fn anchored(mut self, start: Instant) -> Self {
        self.state.get_mut().last_replenishment = start;
        self
    }

    fn replenish(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_replenishment);
        let periods_passed = elapsed.as_nanos() as u64 / self.period_ns;

        if periods_passed > 0 {
            let added = (periods_passed as usize).saturating_mul(self.tokens_per_period);
            state.tokens = state.tokens.saturating_add(added).min(self.token_limit);

            // Advance the clock by the exact periods consumed, keeping the remainder
            // for the next call.
            state.last_replenishment +=
                Duration::from_nanos(periods_passed.saturating_mul(self.period_ns));
        }
    }
}
