//! Timer service boundary.
//!
//! The queue only needs three things from a timer: the current time,
//! scheduling a job at a point in time, and cancelling it. Two clocks are
//! provided: a manually advanced pseudo clock and a tokio-backed real clock.

pub mod pseudo;
pub mod realtime;
pub mod state_machine;

pub use pseudo::PseudoClockTimer;
pub use realtime::RealtimeTimer;

use crate::error::JobError;
use crate::timer::state_machine::validate_transition;
use memflow_core::config::TimerConfig;
use memflow_core::error::MemflowError;
use memflow_core::types::{ClockType, JobId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    Fired,
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Scheduled => write!(f, "scheduled"),
            JobStatus::Fired => write!(f, "fired"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fire once, at exactly this time.
    PointInTime(Timestamp),
}

impl Trigger {
    pub fn fire_time(&self) -> Timestamp {
        match self {
            Trigger::PointInTime(at) => *at,
        }
    }
}

/// Work run by the timer when a job fires.
pub trait Job: Send + 'static {
    fn execute(self: Box<Self>);

    fn describe(&self) -> String;
}

struct JobState {
    id: JobId,
    fire_at: Timestamp,
    status: Mutex<JobStatus>,
    cancelled: Notify,
}

/// Shared handle to a scheduled job. Clones refer to the same job.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobState>,
}

impl JobHandle {
    /// Create the handle for a job that fires at `fire_at`. Timer services
    /// call this when scheduling.
    pub fn new(fire_at: Timestamp) -> Self {
        Self {
            inner: Arc::new(JobState {
                id: JobId::new(),
                fire_at,
                status: Mutex::new(JobStatus::Scheduled),
                cancelled: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.inner.id
    }

    pub fn fire_at(&self) -> Timestamp {
        self.inner.fire_at
    }

    pub fn status(&self) -> JobStatus {
        *self
            .inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_scheduled(&self) -> bool {
        self.status() == JobStatus::Scheduled
    }

    /// Cancel the job. Returns `false` if it already fired or was cancelled;
    /// that is not an error.
    pub fn cancel(&self) -> bool {
        match self.transition(JobStatus::Cancelled) {
            Ok(()) => {
                self.inner.cancelled.notify_one();
                tracing::trace!(job = %self.id(), "Job cancelled");
                true
            }
            Err(_) => false,
        }
    }

    /// Claim the job for firing. Timer services call this right before
    /// running the job; `false` means it was cancelled and must not run.
    pub fn begin_fire(&self) -> bool {
        self.transition(JobStatus::Fired).is_ok()
    }

    /// Resolves once `cancel` has succeeded.
    pub async fn cancelled(&self) {
        self.inner.cancelled.notified().await
    }

    fn transition(&self, to: JobStatus) -> Result<(), JobError> {
        let mut status = self
            .inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        validate_transition(*status, to)?;
        *status = to;
        Ok(())
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id())
            .field("fire_at", &self.fire_at())
            .field("status", &self.status())
            .finish()
    }
}

/// A clock plus a job scheduler. Implementations must accept concurrent
/// callers.
pub trait TimerService: Send + Sync {
    fn clock_type(&self) -> ClockType;

    fn current_time(&self) -> Timestamp;

    /// Register `job` to run when `trigger` fires.
    fn schedule_job(&self, job: Box<dyn Job>, trigger: Trigger) -> JobHandle;

    /// Cancel a job. Idempotent; returns whether this call cancelled it.
    fn remove_job(&self, handle: &JobHandle) -> bool {
        handle.cancel()
    }

    /// Jobs still waiting to fire.
    fn pending_jobs(&self) -> usize;
}

/// A timer built from configuration, keeping the concrete type so callers
/// can still drive a pseudo clock.
#[derive(Clone)]
pub enum ConfiguredTimer {
    Pseudo(Arc<PseudoClockTimer>),
    Realtime(Arc<RealtimeTimer>),
}

impl ConfiguredTimer {
    /// The realtime clock needs a running tokio runtime.
    pub fn from_config(config: &TimerConfig) -> Result<Self, MemflowError> {
        let timer = match config.clock {
            ClockType::Pseudo => {
                ConfiguredTimer::Pseudo(Arc::new(PseudoClockTimer::new(config.start_time())))
            }
            ClockType::Realtime => ConfiguredTimer::Realtime(Arc::new(RealtimeTimer::from_current()?)),
        };
        tracing::debug!(clock = %config.clock, "Timer service created");
        Ok(timer)
    }

    pub fn service(&self) -> Arc<dyn TimerService> {
        match self {
            ConfiguredTimer::Pseudo(timer) => Arc::clone(timer) as Arc<dyn TimerService>,
            ConfiguredTimer::Realtime(timer) => Arc::clone(timer) as Arc<dyn TimerService>,
        }
    }

    pub fn pseudo(&self) -> Option<&Arc<PseudoClockTimer>> {
        match self {
            ConfiguredTimer::Pseudo(timer) => Some(timer),
            ConfiguredTimer::Realtime(_) => None,
        }
    }
}
