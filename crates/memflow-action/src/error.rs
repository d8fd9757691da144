//! Error types for the action queue.

use crate::timer::JobStatus;
use memflow_core::error::MemflowError;
use memflow_core::types::FactId;
use std::time::Duration;

/// Errors raised by propagation targets and entry points.
///
/// The queue never catches these; they are handed back to whoever drives the
/// consumer.
#[derive(Debug, thiserror::Error)]
pub enum PropagationError {
    #[error("Propagation to {target} failed: {reason}")]
    Failed { target: String, reason: String },
    #[error("Fact {fact} is not known to entry point {entry_point}")]
    UnknownFact { fact: FactId, entry_point: String },
}

impl PropagationError {
    pub fn failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        PropagationError::Failed {
            target: target.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from waiting on a rendezvous result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RendezvousError {
    #[error("Interrupted before a result was published")]
    Interrupted,
    #[error("No result after {0:?}")]
    Timeout(Duration),
}

/// Errors from executing queued actions.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Propagation error: {0}")]
    Propagation(#[from] PropagationError),
    #[error("Entry point not registered: {0}")]
    UnknownEntryPoint(String),
    #[error("Rendezvous error: {0}")]
    Rendezvous(#[from] RendezvousError),
    #[error("Worker error: {0}")]
    Worker(String),
    #[error("Core error: {0}")]
    Core(#[from] MemflowError),
}

/// Errors from timer job bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Invalid job transition: {0} -> {1}")]
    InvalidTransition(JobStatus, JobStatus),
}
