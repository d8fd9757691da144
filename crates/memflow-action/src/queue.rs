//! Multi-producer, single-consumer action queue.
//!
//! Producers enqueue from any thread. One drainer at a time pops entries in
//! FIFO order and executes them; a second drainer that arrives while a drain
//! is running returns at once and leaves its entries to the active one.

use crate::entry::ActionEntry;
use crate::error::ActionError;
use crate::memory::WorkingMemory;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tokio::sync::Notify;

/// Position of an entry in submission order, returned by `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

#[derive(Default)]
struct QueueState {
    entries: VecDeque<(Ticket, ActionEntry)>,
    next_ticket: u64,
    // Thread holding the drain right, if any.
    drainer: Option<ThreadId>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    wakeup: Notify,
}

/// Shared handle to one working memory's queue. Clones refer to the same
/// queue.
#[derive(Clone)]
pub struct ActionQueue {
    inner: Arc<QueueInner>,
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                wakeup: Notify::new(),
            }),
        }
    }

    /// Append an entry and wake the worker, if any.
    pub fn enqueue(&self, entry: ActionEntry) -> Ticket {
        let kind = entry.kind();
        let (ticket, depth) = {
            let mut state = self.lock();
            let ticket = Ticket(state.next_ticket);
            state.next_ticket += 1;
            state.entries.push_back((ticket, entry));
            (ticket, state.entries.len())
        };
        self.inner.wakeup.notify_one();
        tracing::trace!(%kind, depth, "Enqueued action");
        ticket
    }

    /// Take an entry back out if the consumer has not started it yet.
    pub fn withdraw(&self, ticket: Ticket) -> Option<ActionEntry> {
        let mut state = self.lock();
        let index = state.entries.iter().position(|(t, _)| *t == ticket)?;
        state.entries.remove(index).map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.lock().drainer.is_some()
    }

    /// True when called from inside an entry the current thread is draining.
    pub fn is_drained_by_current_thread(&self) -> bool {
        self.lock().drainer == Some(thread::current().id())
    }

    /// Human-readable form of every queued entry, head first.
    pub fn pending_descriptions(&self) -> Vec<String> {
        self.lock()
            .entries
            .iter()
            .map(|(_, entry)| entry.to_string())
            .collect()
    }

    /// Resolves after the next `enqueue`. A wake-up sent while nobody waits
    /// is kept for the next caller.
    pub async fn notified(&self) {
        self.inner.wakeup.notified().await
    }

    /// Execute queued entries until the queue is empty. Returns the number
    /// executed, or `Ok(0)` when another drain is already running.
    ///
    /// On failure the failing entry is dropped, the drain ends and the
    /// remaining entries stay queued for the next call.
    pub fn drain(&self, wm: &WorkingMemory, marshalling: bool) -> Result<usize, ActionError> {
        let Some(mut drain) = self.begin_drain() else {
            tracing::trace!("Drain already in progress");
            return Ok(0);
        };

        let mut executed = 0;
        while let Some(entry) = drain.take_next() {
            tracing::trace!(entry = %entry, "Executing action");
            if let Err(e) = wm.run_entry(entry, marshalling) {
                tracing::warn!(error = %e, executed, remaining = self.len(), "Action failed, stopping drain");
                return Err(e);
            }
            executed += 1;
        }

        if executed > 0 {
            tracing::debug!(executed, marshalling, "Drained action queue");
        }
        Ok(executed)
    }

    fn begin_drain(&self) -> Option<Drain<'_>> {
        let mut state = self.lock();
        if state.drainer.is_some() {
            return None;
        }
        state.drainer = Some(thread::current().id());
        Some(Drain {
            queue: self,
            finished: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive drain right. Releases the drainer slot in the same critical
/// section that observes the queue empty, or on drop if the drain ends early.
struct Drain<'a> {
    queue: &'a ActionQueue,
    finished: bool,
}

impl Drain<'_> {
    fn take_next(&mut self) -> Option<ActionEntry> {
        let mut state = self.queue.lock();
        let next = state.entries.pop_front().map(|(_, entry)| entry);
        if next.is_none() {
            state.drainer = None;
            self.finished = true;
        }
        next
    }
}

impl Drop for Drain<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.queue.lock().drainer = None;
        }
    }
}
