//! Job state machine with validated transitions.
//!
//! A job is scheduled once and then either fires or is cancelled:
//! Scheduled -> Fired
//! Scheduled -> Cancelled

use crate::error::JobError;
use crate::timer::JobStatus;

/// Validate that a job status transition is allowed.
///
/// Valid transitions:
/// - Scheduled -> Fired
/// - Scheduled -> Cancelled
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), JobError> {
    let valid = matches!(
        (from, to),
        (JobStatus::Scheduled, JobStatus::Fired) | (JobStatus::Scheduled, JobStatus::Cancelled)
    );

    if valid {
        Ok(())
    } else {
        Err(JobError::InvalidTransition(from, to))
    }
}
