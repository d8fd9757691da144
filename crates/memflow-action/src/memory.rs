//! Working memory: the producer-facing facade over the action queue.

use crate::context::PropagationContext;
use crate::entry::{ActionEntry, Delete, Insert, Update};
use crate::error::ActionError;
use crate::expiration::ExpirationReport;
use crate::fact::FactHandle;
use crate::network::{EntryPoint, ObjectTypeConf};
use crate::queue::ActionQueue;
use crate::rendezvous::{Rendezvous, ResultHandle};
use crate::timer::TimerService;
use memflow_core::config::QueueConfig;
use memflow_core::types::{ConsumerMode, Timestamp};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// One rule session's queue, clock and entry points.
///
/// In `Passive` mode whoever calls `flush` is the consumer, and submitting an
/// immediate-flush entry flushes on the submitter's thread. In `Worker` mode a
/// `QueueWorker` consumes, and submitters only wake it.
pub struct WorkingMemory {
    id: Uuid,
    queue: ActionQueue,
    timer: Arc<dyn TimerService>,
    entry_points: RwLock<HashMap<String, Arc<dyn EntryPoint>>>,
    consumer_mode: ConsumerMode,
    rendezvous_timeout: Option<Duration>,
    expiration_deferred: AtomicBool,
}

impl WorkingMemory {
    pub fn new(timer: Arc<dyn TimerService>, consumer_mode: ConsumerMode) -> Self {
        let id = Uuid::new_v4();
        tracing::debug!(%id, %consumer_mode, clock = %timer.clock_type(), "Working memory created");
        Self {
            id,
            queue: ActionQueue::new(),
            timer,
            entry_points: RwLock::new(HashMap::new()),
            consumer_mode,
            rendezvous_timeout: None,
            expiration_deferred: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &QueueConfig, timer: Arc<dyn TimerService>) -> Self {
        Self::new(timer, config.consumer_mode).with_rendezvous_timeout(config.rendezvous_timeout())
    }

    /// Default wait used by `call`. `None` waits forever.
    pub fn with_rendezvous_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.rendezvous_timeout = timeout;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn consumer_mode(&self) -> ConsumerMode {
        self.consumer_mode
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub fn timer(&self) -> &Arc<dyn TimerService> {
        &self.timer
    }

    pub fn current_time(&self) -> Timestamp {
        self.timer.current_time()
    }

    /// Register an entry point under its name, replacing any previous one.
    pub fn register_entry_point(&self, entry_point: Arc<dyn EntryPoint>) {
        let name = entry_point.name().to_string();
        let replaced = self
            .entry_points
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), entry_point)
            .is_some();
        tracing::debug!(entry_point = %name, replaced, "Entry point registered");
    }

    pub fn entry_point(&self, name: &str) -> Option<Arc<dyn EntryPoint>> {
        self.entry_points
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Hand an entry to the consumer.
    ///
    /// Entries that need immediate flushing run inline when issued from a
    /// rule consequence or from the thread that is draining the queue;
    /// otherwise they are queued and then flushed (passive) or picked up by
    /// the worker.
    ///
    /// If a passive flush fails on an earlier entry, the submitted entry is
    /// withdrawn before the error is returned, so it never runs later with
    /// nobody waiting on it.
    pub fn submit(&self, entry: ActionEntry) -> Result<(), ActionError> {
        if !entry.requires_immediate_flushing() {
            self.queue.enqueue(entry);
            return Ok(());
        }

        if entry.is_called_from_rhs() {
            tracing::trace!(entry = %entry, "Executing inline from rule consequence");
            return self.run_entry(entry, false);
        }
        if self.queue.is_drained_by_current_thread() {
            tracing::trace!(entry = %entry, "Executing inline on the draining thread");
            return self.run_entry(entry, false);
        }

        let ticket = self.queue.enqueue(entry);
        match self.consumer_mode {
            ConsumerMode::Passive => {
                if let Err(e) = self.flush() {
                    if let Some(withdrawn) = self.queue.withdraw(ticket) {
                        tracing::warn!(entry = %withdrawn, error = %e, "Withdrawn after an earlier action failed");
                    }
                    return Err(e);
                }
            }
            ConsumerMode::Worker => {}
        }
        Ok(())
    }

    /// Submit an insert, then schedule its expiration.
    ///
    /// The insert is queued first so an immediate `Expire` always runs after
    /// the fact has been asserted.
    pub fn insert(
        &self,
        handle: Arc<FactHandle>,
        context: PropagationContext,
        type_conf: Arc<ObjectTypeConf>,
    ) -> Result<ExpirationReport, ActionError> {
        let insert = Insert::new(handle, context, type_conf, self);
        let scheduler = insert.expiration_scheduler();
        self.submit(insert.into())?;
        Ok(scheduler.schedule(self))
    }

    /// Submit an update through the fact's entry point.
    pub fn update(
        &self,
        handle: Arc<FactHandle>,
        context: PropagationContext,
        type_conf: Arc<ObjectTypeConf>,
    ) -> Result<(), ActionError> {
        let entry_point = self.resolve_entry_point(&handle)?;
        self.submit(Update::new(entry_point, handle, context, type_conf).into())
    }

    /// Submit a delete through the fact's entry point.
    pub fn delete(
        &self,
        handle: Arc<FactHandle>,
        context: PropagationContext,
        type_conf: Arc<ObjectTypeConf>,
    ) -> Result<(), ActionError> {
        let entry_point = self.resolve_entry_point(&handle)?;
        self.submit(Delete::new(entry_point, handle, context, type_conf).into())
    }

    /// Queue `body` to run on the consumer and return a handle to its result.
    pub fn submit_call<T, F>(
        &self,
        label: impl Into<String>,
        body: F,
    ) -> Result<ResultHandle<T>, ActionError>
    where
        T: Send + 'static,
        F: FnOnce(&WorkingMemory) -> Result<T, ActionError> + Send + 'static,
    {
        let (entry, handle) = Rendezvous::new(label, body);
        self.submit(entry.into())?;
        Ok(handle)
    }

    /// Run `body` on the consumer and wait for its result, up to the
    /// configured rendezvous timeout.
    pub fn call<T, F>(&self, label: impl Into<String>, body: F) -> Result<T, ActionError>
    where
        T: Clone + Send + 'static,
        F: FnOnce(&WorkingMemory) -> Result<T, ActionError> + Send + 'static,
    {
        let handle = self.submit_call(label, body)?;
        Ok(handle.wait(self.rendezvous_timeout)?)
    }

    /// Drain the queue on the calling thread.
    pub fn flush(&self) -> Result<usize, ActionError> {
        self.queue.drain(self, false)
    }

    /// Drain the queue while replaying a marshalled session.
    pub fn flush_for_marshalling(&self) -> Result<usize, ActionError> {
        self.queue.drain(self, true)
    }

    pub fn pending_actions(&self) -> usize {
        self.queue.len()
    }

    /// True while an entry that defers expiration is executing.
    pub fn is_expiration_deferred(&self) -> bool {
        self.expiration_deferred.load(Ordering::Acquire)
    }

    pub(crate) fn run_entry(&self, entry: ActionEntry, marshalling: bool) -> Result<(), ActionError> {
        let defers = entry.defers_expiration();
        // Entries run inline may nest; restore whatever the outer entry set.
        let outer = defers && self.expiration_deferred.swap(true, Ordering::AcqRel);
        let result = if marshalling {
            entry.execute_for_marshalling(self)
        } else {
            entry.execute(self)
        };
        if defers {
            self.expiration_deferred.store(outer, Ordering::Release);
        }
        result
    }

    fn resolve_entry_point(&self, handle: &FactHandle) -> Result<Arc<dyn EntryPoint>, ActionError> {
        let name = handle.entry_point();
        self.entry_point(name)
            .ok_or_else(|| ActionError::UnknownEntryPoint(name.to_string()))
    }
}
