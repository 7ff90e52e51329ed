use crate::jobs::model::JobId;

/// Submission rejected before any record was written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Unsupported job_type: {0}")]
    UnsupportedJobType(String),
    #[error("Invalid priority: {0}")]
    InvalidPriority(String),
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("max_attempts must be between 1 and {max}, got {got}")]
    InvalidMaxAttempts { got: u32, max: u32 },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record for job {id}: {reason}")]
    Corrupt { id: JobId, reason: String },
    #[error("storage error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_) => StoreError::Unavailable(e.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error()
            || e.is_connection_refusal()
            || e.is_connection_dropped()
            || e.is_timeout()
        {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

/// Errors surfaced by the submission/status boundary.
#[derive(Debug, thiserror::Error)]
pub enum JobQueueError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Job not found")]
    NotFound(JobId),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for JobQueueError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => JobQueueError::NotFound(id),
            other => JobQueueError::Store(other),
        }
    }
}
