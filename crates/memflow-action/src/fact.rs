//! Fact handles as seen by the action queue.
//!
//! A handle carries the fact's identity and payload, the entry point it was
//! inserted through, its temporal window if it is an event, and the timer
//! jobs that will expire it.

use crate::timer::JobHandle;
use memflow_core::types::{FactId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Validity window of an event fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    pub start: Timestamp,
    pub duration_ms: i64,
}

impl EventWindow {
    pub fn point(start: Timestamp) -> Self {
        Self {
            start,
            duration_ms: 0,
        }
    }

    /// End of the window; an overflowing window never ends.
    pub fn end(&self) -> Timestamp {
        self.start.saturating_offset(self.duration_ms)
    }
}

/// Identity and bookkeeping for one fact in working memory.
pub struct FactHandle {
    id: FactId,
    object: serde_json::Value,
    entry_point: String,
    event: Option<EventWindow>,
    jobs: Mutex<Vec<JobHandle>>,
    retracted: AtomicBool,
    expired: AtomicBool,
}

impl FactHandle {
    /// Handle for a plain (non-temporal) fact.
    pub fn new(entry_point: impl Into<String>, object: serde_json::Value) -> Self {
        Self {
            id: FactId::new(),
            object,
            entry_point: entry_point.into(),
            event: None,
            jobs: Mutex::new(Vec::new()),
            retracted: AtomicBool::new(false),
            expired: AtomicBool::new(false),
        }
    }

    /// Handle for an event fact with the given validity window.
    pub fn new_event(
        entry_point: impl Into<String>,
        object: serde_json::Value,
        window: EventWindow,
    ) -> Self {
        Self {
            event: Some(window),
            ..Self::new(entry_point, object)
        }
    }

    pub fn id(&self) -> FactId {
        self.id
    }

    pub fn object(&self) -> &serde_json::Value {
        &self.object
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn event_window(&self) -> Option<EventWindow> {
        self.event
    }

    /// End of the event window, `None` for plain facts.
    pub fn end_timestamp(&self) -> Option<Timestamp> {
        self.event.map(|w| w.end())
    }

    /// Record a cancellable expiration job for this fact.
    pub fn add_job(&self, job: JobHandle) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job);
    }

    /// All jobs ever recorded on this handle, in the order they were added.
    pub fn jobs(&self) -> Vec<JobHandle> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded jobs that have neither fired nor been cancelled.
    pub fn pending_jobs(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|j| j.is_scheduled())
            .count()
    }

    /// Cancel every outstanding job. Returns how many were actually cancelled;
    /// jobs that already fired or were cancelled before are left alone.
    pub fn cancel_jobs(&self) -> usize {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.iter().filter(|j| j.cancel()).count()
    }

    pub fn is_retracted(&self) -> bool {
        self.retracted.load(Ordering::Acquire)
    }

    /// Mark the fact as gone. Returns `true` only for the first call.
    pub fn mark_retracted(&self) -> bool {
        !self.retracted.swap(true, Ordering::AcqRel)
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Acquire)
    }

    pub fn mark_expired(&self) {
        self.expired.store(true, Ordering::Release);
    }
}

impl fmt::Debug for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactHandle")
            .field("id", &self.id)
            .field("entry_point", &self.entry_point)
            .field("event", &self.event)
            .field("retracted", &self.is_retracted())
            .finish()
    }
}

impl fmt::Display for FactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.object)
    }
}
