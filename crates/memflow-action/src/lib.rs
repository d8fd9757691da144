//! Action queue and event expiration for memflow working memories.
//!
//! Producers submit insert, update, delete and rendezvous actions from any
//! thread; a single consumer per working memory applies them in FIFO order.
//! Events inserted into temporal types get per-target expiration deadlines,
//! enforced through a pluggable timer service.

pub mod context;
pub mod entry;
pub mod error;
pub mod expiration;
pub mod fact;
pub mod memory;
pub mod network;
pub mod queue;
pub mod rendezvous;
pub mod timer;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::{PropagationContext, PropagationKind, RuleOrigin};
pub use entry::{ActionEntry, Delete, EntryKind, Expire, Insert, Update};
pub use error::{ActionError, JobError, PropagationError, RendezvousError};
pub use expiration::{ExpirationDecision, ExpirationReport, ExpirationScheduler, SkipReason};
pub use fact::{EventWindow, FactHandle};
pub use memory::WorkingMemory;
pub use network::{EntryPoint, ObjectTypeConf, PropagationTarget, NEVER_EXPIRES, NO_EXPIRATION_OFFSET};
pub use queue::{ActionQueue, Ticket};
pub use rendezvous::{Completion, Rendezvous, ResultHandle};
pub use timer::{
    ConfiguredTimer, Job, JobHandle, JobStatus, PseudoClockTimer, RealtimeTimer, TimerService,
    Trigger,
};
pub use worker::QueueWorker;
