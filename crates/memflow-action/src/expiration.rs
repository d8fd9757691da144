//! Event expiration scheduling.
//!
//! When an event is inserted, every interested target gets its own deadline:
//! the event's end plus the target's expiration offset, never earlier than
//! the insertion time. Deadlines already reached produce an `Expire` entry
//! straight away; later ones become timer jobs that enqueue the `Expire`
//! entry when they fire.

use crate::context::PropagationContext;
use crate::entry::{ActionEntry, Expire, Insert};
use crate::fact::FactHandle;
use crate::memory::WorkingMemory;
use crate::network::{ObjectTypeConf, PropagationTarget, NEVER_EXPIRES};
use crate::queue::ActionQueue;
use crate::timer::{Job, Trigger};
use memflow_core::types::{JobId, TargetId, Timestamp};
use std::fmt;
use std::sync::Arc;

/// End of the event plus the offset. Overflow and negative sums mean the
/// event never expires.
pub fn effective_end(end: Timestamp, offset_ms: i64) -> Timestamp {
    end.saturating_offset(offset_ms)
}

/// An event never expires before it was inserted.
pub fn next_timestamp(insertion_time: Timestamp, effective_end: Timestamp) -> Timestamp {
    insertion_time.max(effective_end)
}

/// Why a (fact, target) pair got no expiration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NegativeOffset,
    NeverExpires,
    Restoring,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NegativeOffset => write!(f, "no offset configured"),
            SkipReason::NeverExpires => write!(f, "never expires"),
            SkipReason::Restoring => write!(f, "restoring session"),
        }
    }
}

/// Outcome for one (fact, target) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationDecision {
    Skipped(SkipReason),
    /// Deadline already reached; an `Expire` entry was enqueued.
    Immediate { deadline: Timestamp },
    /// A job was scheduled to fire at `deadline`.
    Scheduled { deadline: Timestamp, job: JobId },
}

impl ExpirationDecision {
    pub fn deadline(&self) -> Option<Timestamp> {
        match self {
            ExpirationDecision::Skipped(_) => None,
            ExpirationDecision::Immediate { deadline }
            | ExpirationDecision::Scheduled { deadline, .. } => Some(*deadline),
        }
    }
}

/// Decisions for every target of one insert, in target order. A `None`
/// target is the type-level default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpirationReport {
    pub decisions: Vec<(Option<TargetId>, ExpirationDecision)>,
}

impl ExpirationReport {
    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn scheduled(&self) -> usize {
        self.count(|d| matches!(d, ExpirationDecision::Scheduled { .. }))
    }

    pub fn immediate(&self) -> usize {
        self.count(|d| matches!(d, ExpirationDecision::Immediate { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|d| matches!(d, ExpirationDecision::Skipped(_)))
    }

    /// Decision for the named target, or for the type-level default when
    /// `target` is `None`.
    pub fn decision_for(&self, target: Option<&str>) -> Option<ExpirationDecision> {
        self.decisions
            .iter()
            .find(|(id, _)| id.as_ref().map(TargetId::as_str) == target)
            .map(|(_, decision)| *decision)
    }

    fn count(&self, pred: impl Fn(&ExpirationDecision) -> bool) -> usize {
        self.decisions.iter().filter(|(_, d)| pred(d)).count()
    }
}

/// Everything expiration scheduling needs from an `Insert`, detached from it
/// so the insert itself can be submitted first.
#[derive(Clone)]
pub struct ExpirationScheduler {
    handle: Arc<FactHandle>,
    type_conf: Arc<ObjectTypeConf>,
    is_event: bool,
    restoring: bool,
    insertion_time: Timestamp,
}

impl ExpirationScheduler {
    pub fn new(
        handle: Arc<FactHandle>,
        type_conf: Arc<ObjectTypeConf>,
        context: &PropagationContext,
        insertion_time: Timestamp,
    ) -> Self {
        Self {
            is_event: type_conf.is_event(),
            handle,
            type_conf,
            restoring: context.is_restoring(),
            insertion_time,
        }
    }

    /// Compute a deadline per target and either enqueue an `Expire` or
    /// schedule a job for it. Non-event types produce an empty report.
    pub fn schedule(&self, wm: &WorkingMemory) -> ExpirationReport {
        let mut report = ExpirationReport::default();
        if !self.is_event {
            return report;
        }

        let mut pairs: Vec<(Option<Arc<dyn PropagationTarget>>, i64)> = self
            .type_conf
            .targets()
            .iter()
            .map(|target| (Some(Arc::clone(target)), target.expiration_offset()))
            .collect();
        if !self.type_conf.has_concrete_target() {
            pairs.push((None, self.type_conf.expiration_offset()));
        }

        for (target, offset) in pairs {
            let target_id = target.as_ref().map(|t| t.id().clone());
            let decision = self.decide(target, offset, wm);
            tracing::debug!(
                fact = %self.handle.id(),
                target = target_id.as_ref().map(TargetId::as_str).unwrap_or("<type>"),
                offset,
                ?decision,
                "Expiration decision"
            );
            report.decisions.push((target_id, decision));
        }
        report
    }

    fn decide(
        &self,
        target: Option<Arc<dyn PropagationTarget>>,
        offset: i64,
        wm: &WorkingMemory,
    ) -> ExpirationDecision {
        if offset < 0 {
            return ExpirationDecision::Skipped(SkipReason::NegativeOffset);
        }
        if offset == NEVER_EXPIRES {
            return ExpirationDecision::Skipped(SkipReason::NeverExpires);
        }
        if self.restoring {
            return ExpirationDecision::Skipped(SkipReason::Restoring);
        }

        // An event type inserted through a plain handle ends when inserted.
        let end = self.handle.end_timestamp().unwrap_or(self.insertion_time);
        let deadline = next_timestamp(self.insertion_time, effective_end(end, offset));
        let expire = Expire::new(Arc::clone(&self.handle), target, Arc::clone(&self.type_conf));

        if deadline <= wm.current_time() {
            wm.queue().enqueue(ActionEntry::Expire(expire));
            return ExpirationDecision::Immediate { deadline };
        }

        let job = wm.timer().schedule_job(
            Box::new(ExpireJob {
                action: expire,
                queue: wm.queue().clone(),
            }),
            Trigger::PointInTime(deadline),
        );
        self.handle.add_job(job.clone());
        ExpirationDecision::Scheduled {
            deadline,
            job: job.id(),
        }
    }
}

impl Insert {
    /// Detach the expiration step from this insert.
    pub fn expiration_scheduler(&self) -> ExpirationScheduler {
        ExpirationScheduler::new(
            Arc::clone(&self.handle),
            Arc::clone(&self.type_conf),
            &self.context,
            self.insertion_time,
        )
    }

    /// Schedule expiration for this insert. Call once, before submitting it.
    pub fn schedule_expiration(&self, wm: &WorkingMemory) -> ExpirationReport {
        self.expiration_scheduler().schedule(wm)
    }
}

/// Timer payload: hands its `Expire` entry to the queue when it fires.
pub struct ExpireJob {
    action: Expire,
    queue: ActionQueue,
}

impl Job for ExpireJob {
    fn execute(self: Box<Self>) {
        let this = *self;
        this.queue.enqueue(ActionEntry::Expire(this.action));
    }

    fn describe(&self) -> String {
        match self.action.target() {
            Some(target) => format!("expire {} from {}", self.action.handle(), target.id()),
            None => format!("expire {}", self.action.handle()),
        }
    }
}
