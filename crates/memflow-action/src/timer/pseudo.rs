//! Manually advanced clock.
//!
//! Jobs fire only when time is moved past their deadline, in deadline order.
//! Used for tests, simulations and session replay.

use crate::timer::{Job, JobHandle, TimerService, Trigger};
use memflow_core::types::{ClockType, Timestamp};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

struct ScheduledJob {
    handle: JobHandle,
    job: Box<dyn Job>,
}

struct PseudoState {
    now: Timestamp,
    seq: u64,
    // Keyed by (deadline, scheduling order) so ties fire first-come first-served.
    jobs: BTreeMap<(Timestamp, u64), ScheduledJob>,
}

/// Timer service whose clock moves only when told to.
pub struct PseudoClockTimer {
    state: Mutex<PseudoState>,
}

impl PseudoClockTimer {
    pub fn new(start: Timestamp) -> Self {
        Self {
            state: Mutex::new(PseudoState {
                now: start,
                seq: 0,
                jobs: BTreeMap::new(),
            }),
        }
    }

    /// Move the clock forward by `delta_ms` and fire every job that became
    /// due. Returns the number of jobs fired.
    pub fn advance_time(&self, delta_ms: u64) -> usize {
        let target = {
            let state = self.lock();
            state.now.saturating_offset(delta_ms.min(i64::MAX as u64) as i64)
        };
        self.set_time(target)
    }

    /// Set the clock to `time` (never backwards) and fire every job due by
    /// then. Returns the number of jobs fired.
    pub fn set_time(&self, time: Timestamp) -> usize {
        let due: Vec<ScheduledJob> = {
            let mut state = self.lock();
            if time > state.now {
                state.now = time;
            }
            let now = state.now;
            // Jobs cancelled through their handle are dropped here.
            state.jobs.retain(|_, scheduled| scheduled.handle.is_scheduled());
            let keys: Vec<(Timestamp, u64)> = state
                .jobs
                .range(..=(now, u64::MAX))
                .map(|(key, _)| *key)
                .filter(|(at, _)| !at.is_max())
                .collect();
            keys.iter()
                .filter_map(|key| state.jobs.remove(key))
                .collect()
        };

        let mut fired = 0;
        for scheduled in due {
            if scheduled.handle.begin_fire() {
                tracing::debug!(
                    job = %scheduled.handle.id(),
                    fire_at = %scheduled.handle.fire_at(),
                    "Pseudo clock firing job: {}",
                    scheduled.job.describe()
                );
                scheduled.job.execute();
                fired += 1;
            }
        }
        fired
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PseudoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PseudoClockTimer {
    fn default() -> Self {
        Self::new(Timestamp::ZERO)
    }
}

impl TimerService for PseudoClockTimer {
    fn clock_type(&self) -> ClockType {
        ClockType::Pseudo
    }

    fn current_time(&self) -> Timestamp {
        self.lock().now
    }

    fn schedule_job(&self, job: Box<dyn Job>, trigger: Trigger) -> JobHandle {
        let handle = JobHandle::new(trigger.fire_time());
        let mut state = self.lock();
        state.seq += 1;
        let key = (trigger.fire_time(), state.seq);
        state.jobs.insert(
            key,
            ScheduledJob {
                handle: handle.clone(),
                job,
            },
        );
        handle
    }

    fn remove_job(&self, handle: &JobHandle) -> bool {
        let cancelled = handle.cancel();
        let mut state = self.lock();
        state.jobs.retain(|_, scheduled| scheduled.handle.id() != handle.id());
        cancelled
    }

    fn pending_jobs(&self) -> usize {
        self.lock()
            .jobs
            .values()
            .filter(|scheduled| scheduled.handle.is_scheduled())
            .count()
    }
}
