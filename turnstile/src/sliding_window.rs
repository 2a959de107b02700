use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::Permit;
use crate::Reason;
use crate::Strategy;
use crate::policy::Acquisition;
use crate::queue::QueueOrder;
use crate::queue::Queued;
use crate::queue::WaitQueue;
use crate::queue::Waiter;
use crate::statistics::Statistics;
use crate::statistics::Tally;

/// Upper bound on `segments_per_window` accepted from configuration.
pub const MAX_SEGMENTS_PER_WINDOW: usize = 1024;

/// A segmented Sliding Window implementation.
///
/// The window is split into `segments` equal sub-intervals aligned to the limiter's
/// anchor. The ring keeps one slot more than there are segments, because the
/// oldest segment still overlaps the trailing window until its end falls behind
/// `now - window`. A permit is counted until then, so no half-open interval of
/// length `window` ever sees more than `permit_limit` admissions.
#[derive(Debug)]
pub struct SlidingWindow {
    permit_limit: usize,
    segment_ns: u64,
    anchor: Instant,
    state: Mutex<SlidingState>,
    tally: Tally,
}

#[derive(Debug)]
struct SlidingState {
    /// Absolute index of the newest segment.
    head: u64,
    /// Per-segment counts, indexed by absolute segment index modulo the ring length.
    counts: Vec<usize>,
    /// Sum of `counts`.
    total: usize,
    queue: WaitQueue,
}

impl SlidingWindow {
    /// Creates a new `SlidingWindow` strategy without a queue.
    ///
    /// The segment length is `window / segments`, rounded up to whole nanoseconds so
    /// the segments always cover the full window.
    pub fn new(permit_limit: NonZeroUsize, window: Duration, segments: NonZeroUsize) -> Self {
        let window_ns = window.as_nanos() as u64;
        let segment_ns = window_ns.div_ceil(segments.get() as u64).max(1);
        Self {
            permit_limit: permit_limit.get(),
            segment_ns,
            anchor: Instant::now(),
            state: Mutex::new(SlidingState {
                head: 0,
                counts: vec![0; segments.get() + 1],
                total: 0,
                queue: WaitQueue::new(0, QueueOrder::OldestFirst),
            }),
            tally: Tally::default(),
        }
    }

    /// Allows up to `queue_limit` callers to wait for an expiring segment.
    pub fn with_queue(mut self, queue_limit: usize, order: QueueOrder) -> Self {
        self.state.get_mut().queue = WaitQueue::new(queue_limit, order);
        self
    }

    /// Aligns segment boundaries to `anchor` instead of construction time.
    pub fn anchored(mut self, anchor: Instant) -> Self {
        self.anchor = anchor;
        self
    }

    /// Attempts to admit a request at `now`, parking it when the window is full and
    /// the queue has room.
    pub fn acquire_at(self: &Arc<Self>, now: Instant) -> Acquisition {
        let mut state = self.state.lock();
        match self.decide(&mut state, now) {
            ControlFlow::Continue(()) => {
                self.tally.admitted(1);
                Acquisition::Admitted(Permit::detached())
            }
            ControlFlow::Break(reason) => match state.queue.push() {
                Some(parked) => {
                    self.tally.rejected(parked.evicted);
                    let deadline = self.next_expiry(&state);
                    drop(state);
                    debug!(queued = parked.id, "sliding window full; request queued");
                    let owner: Arc<dyn Queued> = self.clone();
                    Acquisition::Queued(Waiter::new(parked, owner, deadline))
                }
                None => {
                    self.tally.rejected(1);
                    Acquisition::Rejected(reason)
                }
            },
        }
    }

    fn segment_index(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.anchor).as_nanos() as u64 / self.segment_ns
    }

    fn segment_start(&self, index: u64) -> Instant {
        self.anchor + Duration::from_nanos(index.saturating_mul(self.segment_ns))
    }

    fn ring(state: &SlidingState) -> u64 {
        state.counts.len() as u64
    }

    /// Oldest absolute segment index that still overlaps the trailing window.
    fn oldest_live(state: &SlidingState) -> u64 {
        state.head.saturating_sub(Self::ring(state) - 1)
    }

    fn advance(&self, state: &mut SlidingState, now: Instant) {
        let current = self.segment_index(now);
        // A clock going backwards keeps the newest segment where it is.
        if current <= state.head {
            return;
        }

        let ring = Self::ring(state);
        let steps = (current - state.head).min(ring);
        for offset in 1..=steps {
            let slot = ((state.head + offset) % ring) as usize;
            state.total -= state.counts[slot];
            state.counts[slot] = 0;
        }
        state.head = current;

        let free = self.permit_limit.saturating_sub(state.total);
        let granted = state.queue.grant(free, current);
        if granted > 0 {
            state.counts[(current % ring) as usize] += granted;
            state.total += granted;
            self.tally.admitted(granted);
        }
    }

    fn decide(&self, state: &mut SlidingState, now: Instant) -> ControlFlow<Reason> {
        self.advance(state, now);

        if state.queue.is_empty() && state.total < self.permit_limit {
            let slot = (state.head % Self::ring(state)) as usize;
            state.counts[slot] += 1;
            state.total += 1;
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Some(self.next_expiry(state).saturating_duration_since(now)),
            })
        }
    }

    /// When the oldest occupied segment leaves the ring, or the next segment boundary
    /// if the ring is empty.
    fn next_expiry(&self, state: &SlidingState) -> Instant {
        let ring = Self::ring(state);
        let oldest_occupied = (Self::oldest_live(state)..=state.head)
            .find(|index| state.counts[(index % ring) as usize] > 0);
        match oldest_occupied {
            Some(index) => self.segment_start(index + ring),
            None => self.segment_start(state.head + 1),
        }
    }
}

impl Strategy for SlidingWindow {
    #[inline]
    fn process_at(&self, now: Instant) -> ControlFlow<Reason, Permit> {
        let mut state = self.state.lock();
        match self.decide(&mut state, now) {
            ControlFlow::Continue(()) => {
                self.tally.admitted(1);
                ControlFlow::Continue(Permit::detached())
            }
            ControlFlow::Break(reason) => {
                self.tally.rejected(1);
                ControlFlow::Break(reason)
            }
        }
    }

    fn statistics(&self) -> Statistics {
        let state = self.state.lock();
        self.tally.snapshot(
            self.permit_limit.saturating_sub(state.total),
            state.queue.len(),
        )
    }
}

impl Queued for SlidingWindow {
    fn wake_at(&self, now: Instant) -> Instant {
        let mut state = self.state.lock();
        self.advance(&mut state, now);
        self.next_expiry(&state)
    }

    fn cancel(&self, id: u64, ticket: Option<u64>) {
        let mut state = self.state.lock();
        if state.queue.remove(id) {
            return;
        }
        if let Some(index) = ticket
            && (Self::oldest_live(&state)..=state.head).contains(&index)
        {
            let slot = (index % Self::ring(&state)) as usize;
            if state.counts[slot] > 0 {
                state.counts[slot] -= 1;
                state.total -= 1;
                self.tally.revoked();

                // The returned slot goes to the next parked caller, if any.
                let head = state.head;
                if state.queue.grant(1, head) == 1 {
                    let slot = (head % Self::ring(&state)) as usize;
                    state.counts[slot] += 1;
                    state.total += 1;
                    self.tally.admitted(1);
                }
            }
        }
    }
}
