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

/// A simple window-based limiter.
///
/// Divides time into fixed intervals. A window opens at the first request after the
/// previous one expired, so idle periods never leave a stale window behind. It can be
/// susceptible to "boundary bursts" where double the limit is allowed in a short
/// period spanning two windows.
///
/// Callers that find the window full can park in a bounded queue and are admitted
/// when the next window opens.
#[derive(Debug)]
pub struct FixedWindow {
    permit_limit: usize,
    window: Duration,
    state: Mutex<WindowState>,
    tally: Tally,
}

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    /// Bumped every time a window opens; stamps the slots handed to parked callers.
    epoch: u64,
    count: usize,
    queue: WaitQueue,
}

impl FixedWindow {
    /// Creates a new `FixedWindow` strategy without a queue.
    ///
    /// # Arguments
    ///
    /// * `permit_limit` - The maximum number of requests allowed within a single window.
    /// * `window` - The duration of the fixed time window.
    pub fn new(permit_limit: NonZeroUsize, window: Duration) -> Self {
        Self {
            permit_limit: permit_limit.get(),
            window,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                epoch: 0,
                count: 0,
                queue: WaitQueue::new(0, QueueOrder::OldestFirst),
            }),
            tally: Tally::default(),
        }
    }

    /// Allows up to `queue_limit` callers to wait for the next window.
    pub fn with_queue(mut self, queue_limit: usize, order: QueueOrder) -> Self {
        self.state.get_mut().queue = WaitQueue::new(queue_limit, order);
        self
    }

    /// Starts the first window at `start` instead of at construction time.
    pub fn anchored(mut self, start: Instant) -> Self {
        self.state.get_mut().window_start = start;
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
                    let deadline = state.window_start + self.window;
                    drop(state);
                    debug!(queued = parked.id, "fixed window full; request queued");
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

    fn advance(&self, state: &mut WindowState, now: Instant) {
        if now.saturating_duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.epoch += 1;
            state.count = 0;

            let granted = state.queue.grant(self.permit_limit, state.epoch);
            state.count += granted;
            self.tally.admitted(granted);
        }
    }

    fn decide(&self, state: &mut WindowState, now: Instant) -> ControlFlow<Reason> {
        self.advance(state, now);

        if state.queue.is_empty() && state.count < self.permit_limit {
            state.count += 1;
            ControlFlow::Continue(())
        } else {
            let expires = state.window_start + self.window;
            ControlFlow::Break(Reason::Overloaded {
                retry_after: Some(expires.saturating_duration_since(now)),
            })
        }
    }
}

impl Strategy for FixedWindow {
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
            self.permit_limit.saturating_sub(state.count),
            state.queue.len(),
        )
    }
}

impl Queued for FixedWindow {
    fn wake_at(&self, now: Instant) -> Instant {
        let mut state = self.state.lock();
        self.advance(&mut state, now);
        state.window_start + self.window
    }

    fn cancel(&self, id: u64, ticket: Option<u64>) {
        let mut state = self.state.lock();
        if state.queue.remove(id) {
            return;
        }
        // A slot granted in the current window is handed back. One from an older
        // window has already expired with it.
        if ticket == Some(state.epoch) {
            state.count = state.count.saturating_sub(1);
            self.tally.revoked();

            // The returned slot goes to the next parked caller, if any.
            let epoch = state.epoch;
            let granted = state.queue.grant(1, epoch);
            state.count += granted;
            self.tally.admitted(granted);
        }
    }
}
