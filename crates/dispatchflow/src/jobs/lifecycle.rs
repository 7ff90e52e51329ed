//! Job lifecycle state machine.
//!
//! ```text
//! queued          -> processing | failed
//! processing      -> completed | failed | retry_scheduled
//! retry_scheduled -> processing | failed
//! completed, failed: terminal
//! ```
//!
//! `failed` is reachable from `queued`/`retry_scheduled` only through the
//! exhausted-attempts guard of the worker loop.

use crate::jobs::model::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Queued, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, RetryScheduled)
                | (RetryScheduled, Processing)
                | (RetryScheduled, Failed)
        )
    }

    pub fn transition(self, next: JobStatus) -> Result<JobStatus, IllegalTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}
