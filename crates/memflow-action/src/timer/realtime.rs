//! Wall-clock timer backed by tokio.
//!
//! Each job is a task that sleeps until its deadline or until it is
//! cancelled, whichever comes first.

use crate::timer::{Job, JobHandle, TimerService, Trigger};
use memflow_core::error::MemflowError;
use memflow_core::types::{ClockType, Timestamp};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Timer service on the system clock. Time is Unix epoch milliseconds.
pub struct RealtimeTimer {
    runtime: Handle,
    pending: Arc<AtomicUsize>,
}

impl RealtimeTimer {
    /// Schedule jobs on the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Schedule jobs on the runtime the caller is running in.
    pub fn from_current() -> Result<Self, MemflowError> {
        let runtime = Handle::try_current()
            .map_err(|e| MemflowError::Config(format!("realtime timer needs a tokio runtime: {e}")))?;
        Ok(Self::new(runtime))
    }
}

impl TimerService for RealtimeTimer {
    fn clock_type(&self) -> ClockType {
        ClockType::Realtime
    }

    fn current_time(&self) -> Timestamp {
        Timestamp::now()
    }

    fn schedule_job(&self, job: Box<dyn Job>, trigger: Trigger) -> JobHandle {
        let fire_at = trigger.fire_time();
        let handle = JobHandle::new(fire_at);

        // A job due "never" needs no task; it can still be cancelled.
        if fire_at.is_max() {
            tracing::debug!(job = %handle.id(), "Job deadline is unbounded, not arming a timer");
            return handle;
        }

        let delay = Duration::from_millis(self.current_time().millis_until(fire_at));
        let task_handle = handle.clone();
        let pending = Arc::clone(&self.pending);
        pending.fetch_add(1, Ordering::AcqRel);

        self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if task_handle.begin_fire() {
                        tracing::debug!(job = %task_handle.id(), "Firing job: {}", job.describe());
                        job.execute();
                    }
                }
                _ = task_handle.cancelled() => {}
            }
            pending.fetch_sub(1, Ordering::AcqRel);
        });

        handle
    }

    fn pending_jobs(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}
