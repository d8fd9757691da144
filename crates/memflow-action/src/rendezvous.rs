//! Blocking call/result hand-off between a producer and the consumer.
//!
//! A `Rendezvous` entry carries a body that the consumer runs like any other
//! queued action. The producer keeps a `ResultHandle` and blocks on it until
//! the consumer publishes the body's result. The result slot is written once,
//! under the gate's lock, before any waiter is woken.

use crate::entry::ActionEntry;
use crate::error::{ActionError, RendezvousError};
use crate::memory::WorkingMemory;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

enum GateState<T> {
    Pending,
    Ready(T),
    Abandoned,
}

struct Gate<T> {
    state: Mutex<GateState<T>>,
    opened: Condvar,
}

impl<T> Gate<T> {
    fn lock(&self) -> MutexGuard<'_, GateState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, outcome: GateState<T>) {
        let mut state = self.lock();
        if matches!(*state, GateState::Pending) {
            *state = outcome;
        }
        drop(state);
        self.opened.notify_all();
    }
}

/// Consumer side of the gate. Consumed by `done`; dropping it without
/// calling `done` releases waiters with `Interrupted`.
pub struct Completion<T> {
    gate: Option<Arc<Gate<T>>>,
}

impl<T> Completion<T> {
    /// Publish the result and open the gate.
    pub fn done(mut self, result: T) {
        if let Some(gate) = self.gate.take() {
            gate.open(GateState::Ready(result));
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.open(GateState::Abandoned);
        }
    }
}

/// Producer side of the gate. Cloneable; every clone observes the same
/// result.
pub struct ResultHandle<T> {
    gate: Arc<Gate<T>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self {
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<T: Clone> ResultHandle<T> {
    /// Block until the consumer publishes the result.
    pub fn get_result(&self) -> Result<T, RendezvousError> {
        let state = self.gate.lock();
        let state = self
            .gate
            .opened
            .wait_while(state, |s| matches!(s, GateState::Pending))
            .unwrap_or_else(PoisonError::into_inner);
        Self::read(&state)
    }

    /// Like `get_result`, giving up with `Timeout` after `timeout`.
    pub fn get_result_timeout(&self, timeout: Duration) -> Result<T, RendezvousError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.gate.lock();
        while matches!(*state, GateState::Pending) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RendezvousError::Timeout(timeout));
            }
            state = self
                .gate
                .opened
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Self::read(&state)
    }

    /// `get_result` or `get_result_timeout` depending on `timeout`.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<T, RendezvousError> {
        match timeout {
            Some(timeout) => self.get_result_timeout(timeout),
            None => self.get_result(),
        }
    }

    /// The result if it has been published, without blocking.
    pub fn try_result(&self) -> Option<Result<T, RendezvousError>> {
        let state = self.gate.lock();
        match *state {
            GateState::Pending => None,
            _ => Some(Self::read(&state)),
        }
    }

    pub fn is_done(&self) -> bool {
        !matches!(*self.gate.lock(), GateState::Pending)
    }

    fn read(state: &GateState<T>) -> Result<T, RendezvousError> {
        match state {
            GateState::Ready(value) => Ok(value.clone()),
            GateState::Abandoned | GateState::Pending => Err(RendezvousError::Interrupted),
        }
    }
}

/// Create a linked completion/handle pair.
pub fn gate<T>() -> (Completion<T>, ResultHandle<T>) {
    let gate = Arc::new(Gate {
        state: Mutex::new(GateState::Pending),
        opened: Condvar::new(),
    });
    (
        Completion {
            gate: Some(Arc::clone(&gate)),
        },
        ResultHandle { gate },
    )
}

type Body = Box<dyn FnOnce(&WorkingMemory) -> Result<(), ActionError> + Send>;

/// Queued action whose submitter waits for its result.
///
/// Always requires immediate flushing: a synchronous caller must see its
/// mutation applied before it gets the result back.
pub struct Rendezvous {
    label: String,
    body: Body,
    from_rhs: bool,
    defers_expiration: bool,
}

impl Rendezvous {
    /// Wrap `body` so its return value is published to the returned handle
    /// once the consumer has run it. If the body fails, waiters see
    /// `Interrupted` and the error goes to the consumer.
    pub fn new<T, F>(label: impl Into<String>, body: F) -> (Self, ResultHandle<T>)
    where
        T: Send + 'static,
        F: FnOnce(&WorkingMemory) -> Result<T, ActionError> + Send + 'static,
    {
        let (completion, handle) = gate();
        let body: Body = Box::new(move |wm: &WorkingMemory| {
            let value = body(wm)?;
            completion.done(value);
            Ok(())
        });
        let entry = Self {
            label: label.into(),
            body,
            from_rhs: false,
            defers_expiration: false,
        };
        (entry, handle)
    }

    /// Decorate an ordinary entry so the submitter can wait until it has been
    /// applied.
    pub fn wrap(entry: ActionEntry) -> (Self, ResultHandle<()>) {
        let label = format!("Rendezvous on {}", entry);
        let from_rhs = entry.is_called_from_rhs();
        let (rendezvous, handle) = Self::new(label, move |wm| entry.execute(wm));
        (
            Self {
                from_rhs,
                ..rendezvous
            },
            handle,
        )
    }

    /// Mark the call as issued from inside a rule consequence, which is
    /// already running on the consumer.
    pub fn from_rhs(mut self) -> Self {
        self.from_rhs = true;
        self
    }

    /// Ask the consumer to hold back expiration while this entry runs.
    pub fn deferring_expiration(mut self) -> Self {
        self.defers_expiration = true;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_called_from_rhs(&self) -> bool {
        self.from_rhs
    }

    pub fn defers_expiration(&self) -> bool {
        self.defers_expiration
    }

    pub fn execute(self, wm: &WorkingMemory) -> Result<(), ActionError> {
        (self.body)(wm)
    }
}

impl fmt::Display for Rendezvous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}
