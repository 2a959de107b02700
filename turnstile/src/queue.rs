use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use std::task::ready;
use std::time::Duration;

use pin_project_lite::pin_project;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio::time::Sleep;
use tokio::time::sleep_until;

use crate::Permit;
use crate::Reason;

/// What a parked caller receives: the ticket of the slot it was given, or why it was
/// turned away. Tickets let a cancelled caller hand an unused slot back.
pub(crate) type Grant = Result<u64, Reason>;

/// Order in which parked callers are served when capacity frees up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOrder {
    /// Serve the longest waiting caller first. New arrivals never overtake the queue.
    #[default]
    OldestFirst,
    /// Serve the most recent caller first. When the queue is full, the oldest
    /// caller is evicted to make room.
    NewestFirst,
}

#[derive(Debug)]
struct Entry {
    id: u64,
    sender: oneshot::Sender<Grant>,
}

/// A bounded list of parked callers.
#[derive(Debug)]
pub(crate) struct WaitQueue {
    limit: usize,
    order: QueueOrder,
    next_id: u64,
    entries: VecDeque<Entry>,
}

pub(crate) struct Parked {
    pub(crate) id: u64,
    pub(crate) receiver: oneshot::Receiver<Grant>,
    pub(crate) evicted: usize,
}

impl WaitQueue {
    pub(crate) fn new(limit: usize, order: QueueOrder) -> Self {
        Self {
            limit,
            order,
            next_id: 0,
            entries: VecDeque::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parks a new caller, or returns `None` when there is no room for it.
    pub(crate) fn push(&mut self) -> Option<Parked> {
        if self.limit == 0 {
            return None;
        }

        let mut evicted = 0;
        if self.entries.len() >= self.limit {
            match self.order {
                QueueOrder::OldestFirst => return None,
                QueueOrder::NewestFirst => {
                    if let Some(oldest) = self.entries.pop_front()
                        && oldest.sender.send(Err(Reason::Evicted)).is_ok()
                    {
                        evicted += 1;
                    }
                }
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        let (sender, receiver) = oneshot::channel();
        self.entries.push_back(Entry { id, sender });

        Some(Parked {
            id,
            receiver,
            evicted,
        })
    }

    /// Hands up to `available` slots, all stamped with `ticket`, to parked callers in
    /// processing order. Returns how many were handed out.
    pub(crate) fn grant(&mut self, available: usize, ticket: u64) -> usize {
        let mut granted = 0;
        while granted < available {
            let next = match self.order {
                QueueOrder::OldestFirst => self.entries.pop_front(),
                QueueOrder::NewestFirst => self.entries.pop_back(),
            };
            let Some(entry) = next else {
                break;
            };
            // A closed receiver belongs to a caller that is going away; skip it
            // without spending a slot.
            if entry.sender.send(Ok(ticket)).is_ok() {
                granted += 1;
            }
        }
        granted
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        match self.entries.iter().position(|entry| entry.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Closes a parked caller's end of the channel and returns the ticket it was granted,
/// if any. Once closed, a later `grant` skips the caller without spending a slot.
fn withdraw(receiver: &mut oneshot::Receiver<Grant>) -> Option<u64> {
    receiver.close();
    match receiver.try_recv() {
        Ok(Ok(ticket)) => Some(ticket),
        _ => None,
    }
}

/// Implemented by strategies that can park callers.
pub(crate) trait Queued: Send + Sync {
    /// Moves the strategy forward to `now`, serving parked callers if capacity has
    /// freed up. Returns the next instant at which capacity may free up.
    fn wake_at(&self, now: Instant) -> Instant;

    /// Forgets parked caller `id`. `ticket` is set when the caller had already been
    /// granted a slot that it will never use.
    fn cancel(&self, id: u64, ticket: Option<u64>);
}

pin_project! {
    /// A caller parked in a policy's wait queue.
    ///
    /// Resolves to a [`Permit`] once a slot is granted, or to the [`Reason`] it was
    /// turned away. While pending it sleeps until the next moment capacity can free
    /// up and then moves its policy forward itself, so no background task is needed.
    /// Dropping an unresolved waiter removes it from the queue.
    pub struct Waiter {
        id: u64,
        receiver: oneshot::Receiver<Grant>,
        owner: Arc<dyn Queued>,
        deadline: Instant,
        #[pin]
        sleep: Option<Sleep>,
        finished: bool,
    }

    impl PinnedDrop for Waiter {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if !*this.finished {
                let ticket = withdraw(this.receiver);
                this.owner.cancel(*this.id, ticket);
            }
        }
    }
}

impl Waiter {
    pub(crate) fn new(parked: Parked, owner: Arc<dyn Queued>, deadline: Instant) -> Self {
        Self {
            id: parked.id,
            receiver: parked.receiver,
            owner,
            deadline,
            sleep: None,
            finished: false,
        }
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("deadline", &self.deadline)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Future for Waiter {
    type Output = Result<Permit, Reason>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        loop {
            if let Poll::Ready(outcome) = Pin::new(&mut *this.receiver).poll(cx) {
                *this.finished = true;
                return Poll::Ready(match outcome {
                    Ok(Ok(_ticket)) => Ok(Permit::detached()),
                    Ok(Err(reason)) => Err(reason),
                    Err(_) => Err(Reason::Evicted),
                });
            }

            // The sleep is created lazily so a waiter can be built outside a runtime.
            match this.sleep.as_mut().as_pin_mut() {
                Some(sleep) => ready!(sleep.poll(cx)),
                None => {
                    this.sleep.set(Some(sleep_until(*this.deadline)));
                    continue;
                }
            }

            let now = Instant::now();
            let next = this
                .owner
                .wake_at(now)
                .max(now + Duration::from_millis(1));
            *this.deadline = next;
            if let Some(sleep) = this.sleep.as_mut().as_pin_mut() {
                sleep.reset(next);
            }
        }
    }
}
