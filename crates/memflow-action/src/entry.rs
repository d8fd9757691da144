//! Queued units of work.
//!
//! Every mutation of working memory travels through the action queue as an
//! `ActionEntry`. Entries know nothing about the queue that holds them; the
//! queue owns them by value and hands each one to the consumer exactly once.
//! Executing an entry consumes it.

use crate::context::PropagationContext;
use crate::error::ActionError;
use crate::fact::FactHandle;
use crate::memory::WorkingMemory;
use crate::network::{EntryPoint, ObjectTypeConf, PropagationTarget};
use crate::rendezvous::Rendezvous;
use memflow_core::types::Timestamp;
use std::fmt;
use std::sync::Arc;

/// Discriminant of an `ActionEntry`, for logging and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Insert,
    Update,
    Delete,
    Expire,
    Rendezvous,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Insert => write!(f, "insert"),
            EntryKind::Update => write!(f, "update"),
            EntryKind::Delete => write!(f, "delete"),
            EntryKind::Expire => write!(f, "expire"),
            EntryKind::Rendezvous => write!(f, "rendezvous"),
        }
    }
}

/// A unit of work for the consumer.
pub enum ActionEntry {
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Expire(Expire),
    Rendezvous(Rendezvous),
}

impl ActionEntry {
    pub fn kind(&self) -> EntryKind {
        match self {
            ActionEntry::Insert(_) => EntryKind::Insert,
            ActionEntry::Update(_) => EntryKind::Update,
            ActionEntry::Delete(_) => EntryKind::Delete,
            ActionEntry::Expire(_) => EntryKind::Expire,
            ActionEntry::Rendezvous(_) => EntryKind::Rendezvous,
        }
    }

    /// Apply the entry to working memory. Consumer thread only.
    pub fn execute(self, wm: &WorkingMemory) -> Result<(), ActionError> {
        match self {
            ActionEntry::Insert(insert) => insert.execute(wm),
            ActionEntry::Update(update) => update.execute(wm),
            ActionEntry::Delete(delete) => delete.execute(wm),
            ActionEntry::Expire(expire) => expire.execute(wm),
            ActionEntry::Rendezvous(rendezvous) => rendezvous.execute(wm),
        }
    }

    /// Apply the entry while replaying a marshalled session.
    pub fn execute_for_marshalling(self, wm: &WorkingMemory) -> Result<(), ActionError> {
        match self {
            ActionEntry::Insert(insert) => insert.execute_for_marshalling(wm),
            other => other.execute(wm),
        }
    }

    /// Whether the queue must be flushed up to and including this entry
    /// before the submitter continues.
    pub fn requires_immediate_flushing(&self) -> bool {
        matches!(self, ActionEntry::Rendezvous(_))
    }

    /// Whether the entry was produced by a rule consequence, i.e. on the
    /// consumer thread itself.
    pub fn is_called_from_rhs(&self) -> bool {
        match self {
            ActionEntry::Insert(insert) => insert.context.is_called_from_rhs(),
            ActionEntry::Update(update) => update.context.is_called_from_rhs(),
            ActionEntry::Delete(delete) => delete.context.is_called_from_rhs(),
            ActionEntry::Expire(_) => false,
            ActionEntry::Rendezvous(rendezvous) => rendezvous.is_called_from_rhs(),
        }
    }

    /// Whether expiration must be held back while this entry executes.
    pub fn defers_expiration(&self) -> bool {
        match self {
            ActionEntry::Rendezvous(rendezvous) => rendezvous.defers_expiration(),
            _ => false,
        }
    }
}

impl fmt::Display for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionEntry::Insert(insert) => write!(f, "Insert of {}", insert.handle),
            ActionEntry::Update(update) => write!(f, "Update of {}", update.handle),
            ActionEntry::Delete(delete) => write!(f, "Delete of {}", delete.handle),
            ActionEntry::Expire(expire) => match &expire.target {
                Some(target) => write!(f, "Expire of {} from {}", expire.handle, target.id()),
                None => write!(f, "Expire of {}", expire.handle),
            },
            ActionEntry::Rendezvous(rendezvous) => write!(f, "{}", rendezvous),
        }
    }
}

impl fmt::Debug for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionEntry({})", self)
    }
}

impl From<Insert> for ActionEntry {
    fn from(insert: Insert) -> Self {
        ActionEntry::Insert(insert)
    }
}

impl From<Update> for ActionEntry {
    fn from(update: Update) -> Self {
        ActionEntry::Update(update)
    }
}

impl From<Delete> for ActionEntry {
    fn from(delete: Delete) -> Self {
        ActionEntry::Delete(delete)
    }
}

impl From<Expire> for ActionEntry {
    fn from(expire: Expire) -> Self {
        ActionEntry::Expire(expire)
    }
}

impl From<Rendezvous> for ActionEntry {
    fn from(rendezvous: Rendezvous) -> Self {
        ActionEntry::Rendezvous(rendezvous)
    }
}

// =============================================================================
// Insert
// =============================================================================

/// A fact entering working memory.
///
/// Building an `Insert` has no side effects beyond reading the clock;
/// expiration is scheduled in a separate step (see `crate::expiration`).
pub struct Insert {
    pub(crate) handle: Arc<FactHandle>,
    pub(crate) context: PropagationContext,
    pub(crate) type_conf: Arc<ObjectTypeConf>,
    pub(crate) is_event: bool,
    pub(crate) insertion_time: Timestamp,
}

impl Insert {
    pub fn new(
        handle: Arc<FactHandle>,
        context: PropagationContext,
        type_conf: Arc<ObjectTypeConf>,
        wm: &WorkingMemory,
    ) -> Self {
        let is_event = type_conf.is_event();
        let insertion_time = if is_event {
            wm.current_time()
        } else {
            Timestamp::ZERO
        };
        Self {
            handle,
            context,
            type_conf,
            is_event,
            insertion_time,
        }
    }

    pub fn handle(&self) -> &Arc<FactHandle> {
        &self.handle
    }

    pub fn context(&self) -> &PropagationContext {
        &self.context
    }

    pub fn is_event(&self) -> bool {
        self.is_event
    }

    /// Clock reading at construction; zero for non-temporal types.
    pub fn insertion_time(&self) -> Timestamp {
        self.insertion_time
    }

    /// Assert the fact into every interested target, in registration order.
    pub fn execute(self, wm: &WorkingMemory) -> Result<(), ActionError> {
        for target in self.type_conf.targets() {
            target.assert_propagation(&self.handle, &self.context, wm)?;
        }
        Ok(())
    }

    pub fn execute_for_marshalling(mut self, wm: &WorkingMemory) -> Result<(), ActionError> {
        self.context.set_marshalling(true);
        self.execute(wm)
    }
}

// =============================================================================
// Update / Delete
// =============================================================================

/// A fact already in working memory has changed.
pub struct Update {
    entry_point: Arc<dyn EntryPoint>,
    handle: Arc<FactHandle>,
    context: PropagationContext,
    type_conf: Arc<ObjectTypeConf>,
}

impl Update {
    pub fn new(
        entry_point: Arc<dyn EntryPoint>,
        handle: Arc<FactHandle>,
        context: PropagationContext,
        type_conf: Arc<ObjectTypeConf>,
    ) -> Self {
        Self {
            entry_point,
            handle,
            context,
            type_conf,
        }
    }

    pub fn handle(&self) -> &Arc<FactHandle> {
        &self.handle
    }

    pub fn execute(self, wm: &WorkingMemory) -> Result<(), ActionError> {
        self.entry_point
            .modify_propagation(&self.handle, &self.context, &self.type_conf, wm)?;
        Ok(())
    }
}

/// A fact is leaving working memory.
pub struct Delete {
    entry_point: Arc<dyn EntryPoint>,
    handle: Arc<FactHandle>,
    context: PropagationContext,
    type_conf: Arc<ObjectTypeConf>,
}

impl Delete {
    pub fn new(
        entry_point: Arc<dyn EntryPoint>,
        handle: Arc<FactHandle>,
        context: PropagationContext,
        type_conf: Arc<ObjectTypeConf>,
    ) -> Self {
        Self {
            entry_point,
            handle,
            context,
            type_conf,
        }
    }

    pub fn handle(&self) -> &Arc<FactHandle> {
        &self.handle
    }

    /// Retract through the entry point, then drop the handle's pending
    /// expiration jobs.
    pub fn execute(self, wm: &WorkingMemory) -> Result<(), ActionError> {
        self.entry_point
            .retract_propagation(&self.handle, &self.context, &self.type_conf, wm)?;
        self.handle.mark_retracted();
        let cancelled = self.handle.cancel_jobs();
        if cancelled > 0 {
            tracing::debug!(fact = %self.handle.id(), cancelled, "Cancelled expiration jobs on delete");
        }
        Ok(())
    }
}

// =============================================================================
// Expire
// =============================================================================

/// An event's validity window has run out for one target, or for the whole
/// type when `target` is `None`.
pub struct Expire {
    handle: Arc<FactHandle>,
    target: Option<Arc<dyn PropagationTarget>>,
    type_conf: Arc<ObjectTypeConf>,
    context: PropagationContext,
}

impl Expire {
    pub fn new(
        handle: Arc<FactHandle>,
        target: Option<Arc<dyn PropagationTarget>>,
        type_conf: Arc<ObjectTypeConf>,
    ) -> Self {
        Self {
            handle,
            target,
            type_conf,
            context: PropagationContext::expiration(),
        }
    }

    pub fn handle(&self) -> &Arc<FactHandle> {
        &self.handle
    }

    pub fn target(&self) -> Option<&Arc<dyn PropagationTarget>> {
        self.target.as_ref()
    }

    pub fn execute(self, wm: &WorkingMemory) -> Result<(), ActionError> {
        if self.handle.is_retracted() {
            tracing::debug!(fact = %self.handle.id(), "Fact already retracted, nothing to expire");
            return Ok(());
        }
        match &self.target {
            Some(target) => {
                target.expire_propagation(&self.handle, &self.context, wm)?;
                self.handle.mark_expired();
            }
            None => {
                let name = self.handle.entry_point();
                let entry_point = wm
                    .entry_point(name)
                    .ok_or_else(|| ActionError::UnknownEntryPoint(name.to_string()))?;
                entry_point.retract_propagation(&self.handle, &self.context, &self.type_conf, wm)?;
                self.handle.mark_expired();
                self.handle.mark_retracted();
                self.handle.cancel_jobs();
            }
        }
        Ok(())
    }
}
