use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ValidationError;

pub type JobId = Uuid;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Upper bound on `max_attempts`; every backend stores it exactly.
pub const MAX_ATTEMPTS_LIMIT: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SendEmail,
}

impl JobType {
    pub const ALL: &'static [JobType] = &[JobType::SendEmail];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::SendEmail => "send_email",
        }
    }
}

impl FromStr for JobType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnsupportedJobType(s.to_string()))
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Lower dispatch score runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Low,
}

impl Priority {
    pub fn score(&self) -> u32 {
        match self {
            Priority::High => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "low" => Ok(Priority::Low),
            other => Err(ValidationError::InvalidPriority(other.to_string())),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    RetryScheduled,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::RetryScheduled => "retry_scheduled",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "retry_scheduled" => Ok(JobStatus::RetryScheduled),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full snapshot of a job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub priority: Priority,
    pub payload: Value,
    pub status: JobStatus,

    pub attempts: u32,
    pub max_attempts: u32,

    pub created_at: DateTime<Utc>,
    pub picked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub retry_at: Option<DateTime<Utc>>,

    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
}

impl Job {
    pub fn from_new(id: JobId, new: NewJob) -> Self {
        Self {
            id,
            job_type: new.job_type,
            priority: new.priority,
            payload: new.payload,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: new.max_attempts,
            created_at: new.created_at,
            picked_at: None,
            completed_at: None,
            failed_at: None,
            retry_at: None,
            last_error_code: None,
            last_error_message: None,
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Overlay every field present in `patch`.
    pub fn apply(&mut self, patch: &JobPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(attempts) = patch.attempts {
            self.attempts = attempts;
        }
        if let Some(at) = patch.picked_at {
            self.picked_at = Some(at);
        }
        if let Some(at) = patch.completed_at {
            self.completed_at = Some(at);
        }
        if let Some(at) = patch.failed_at {
            self.failed_at = Some(at);
        }
        if let Some(at) = patch.retry_at {
            self.retry_at = Some(at);
        }
        if let Some(code) = &patch.last_error_code {
            self.last_error_code = Some(code.clone());
        }
        if let Some(message) = &patch.last_error_message {
            self.last_error_message = Some(message.clone());
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub priority: Priority,
    pub payload: Value,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl NewJob {
    pub fn now(job_type: JobType, priority: Priority, payload: Value) -> Self {
        Self {
            job_type,
            priority,
            payload,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            created_at: Utc::now(),
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }
}

/// Partial update for `JobStore::merge_update`. `None` leaves the stored field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub attempts: Option<u32>,
    pub picked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub retry_at: Option<DateTime<Utc>>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
}

impl JobPatch {
    pub fn claimed(attempts: u32, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            attempts: Some(attempts),
            picked_at: Some(at),
            ..Self::default()
        }
    }

    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            completed_at: Some(at),
            ..Self::default()
        }
    }

    pub fn failed(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            failed_at: Some(at),
            ..Self::default()
        }
    }

    pub fn retry_scheduled(retry_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(JobStatus::RetryScheduled),
            retry_at: Some(retry_at),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, code: &str, message: &str) -> Self {
        self.last_error_code = Some(code.to_string());
        self.last_error_message = Some(message.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn high_priority_scores_below_low() {
        assert!(Priority::High.score() < Priority::Low.score());
        assert_eq!(Priority::High.score(), 1);
        assert_eq!(Priority::Low.score(), 2);
    }

    #[test]
    fn parses_known_tags_only() {
        assert_eq!("send_email".parse::<JobType>().unwrap(), JobType::SendEmail);
        assert!(matches!(
            "send_fax".parse::<JobType>(),
            Err(ValidationError::UnsupportedJobType(t)) if t == "send_fax"
        ));
        assert!(matches!(
            "urgent".parse::<Priority>(),
            Err(ValidationError::InvalidPriority(_))
        ));
        for s in ["queued", "processing", "retry_scheduled", "completed", "failed"] {
            assert_eq!(s.parse::<JobStatus>().unwrap().as_str(), s);
        }
    }

    #[test]
    fn apply_only_touches_present_fields() {
        let created = Utc::now();
        let mut job = Job::from_new(
            Uuid::new_v4(),
            NewJob {
                job_type: JobType::SendEmail,
                priority: Priority::Low,
                payload: json!({"to": "a@x"}),
                max_attempts: 3,
                created_at: created,
            },
        );

        let picked = Utc::now();
        job.apply(&JobPatch::claimed(1, picked));
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.picked_at, Some(picked));
        assert_eq!(job.created_at, created);
        assert_eq!(job.payload, json!({"to": "a@x"}));

        job.apply(&JobPatch::failed(Utc::now()).with_error("TIMEOUT", "slow"));
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.picked_at, Some(picked));
        assert_eq!(job.last_error_code.as_deref(), Some("TIMEOUT"));
    }
}
