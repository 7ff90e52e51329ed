// Intake path from a raw request to a queued job.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use crate::backend::Backend;
use crate::error::{JobQueueError, ValidationError};
use crate::jobs::dispatch::DispatchQueue;
use crate::jobs::model::{
    Job, JobId, JobType, NewJob, Priority, DEFAULT_MAX_ATTEMPTS, MAX_ATTEMPTS_LIMIT,
};
use crate::jobs::store::JobStore;

#[derive(Clone, Debug)]
pub struct GateConfig {
    pub max_payload_bytes: usize,
    pub default_max_attempts: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 256 * 1024,
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Raw submission as it arrives at the boundary. Every field is optional so
/// that a missing one is reported as a validation error, not a parse error.
/// A present `"payload": null` is `Some(Value::Null)`; only an absent key is `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitRequest {
    pub job_type: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub payload: Option<Value>,
    pub max_attempts: Option<u32>,
}

fn present<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(de).map(Some)
}

impl SubmitRequest {
    pub fn new(job_type: &str, priority: &str, payload: Value) -> Self {
        Self {
            job_type: Some(job_type.to_string()),
            priority: Some(priority.to_string()),
            payload: Some(payload),
            max_attempts: None,
        }
    }
}

#[derive(Clone)]
pub struct SubmissionGate {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn DispatchQueue>,
    cfg: GateConfig,
}

impl SubmissionGate {
    pub fn new(backend: &Backend, cfg: GateConfig) -> Self {
        Self {
            store: backend.store(),
            queue: backend.queue(),
            cfg,
        }
    }

    /// Pure validation; no side effects.
    pub fn validate(&self, req: SubmitRequest) -> Result<NewJob, ValidationError> {
        let job_type = req
            .job_type
            .ok_or(ValidationError::MissingField("job_type"))?;
        let priority = req
            .priority
            .ok_or(ValidationError::MissingField("priority"))?;
        let payload = req.payload.ok_or(ValidationError::MissingField("payload"))?;

        let job_type: JobType = job_type.parse()?;
        let priority: Priority = priority.parse()?;

        let size = serde_json::to_vec(&payload).map(|b| b.len()).unwrap_or(usize::MAX);
        if size > self.cfg.max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size,
                max: self.cfg.max_payload_bytes,
            });
        }

        let max_attempts = req.max_attempts.unwrap_or(self.cfg.default_max_attempts);
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&max_attempts) {
            return Err(ValidationError::InvalidMaxAttempts {
                got: max_attempts,
                max: MAX_ATTEMPTS_LIMIT,
            });
        }

        Ok(NewJob::now(job_type, priority, payload).max_attempts(max_attempts))
    }

    /// Validate, create the record, then make it dispatchable.
    pub async fn submit(&self, req: SubmitRequest) -> Result<JobId, JobQueueError> {
        let job = self.validate(req)?;
        let score = job.priority.score();
        let (job_type, priority) = (job.job_type, job.priority);

        let id = self.store.create(job).await?;
        if let Err(e) = self.queue.enqueue(id, score).await {
            error!(job_id = %id, error = %e, "job stored but could not be enqueued");
            return Err(e.into());
        }

        info!(job_id = %id, %job_type, %priority, "job queued");
        Ok(id)
    }

    pub async fn status(&self, id: JobId) -> Result<Job, JobQueueError> {
        Ok(self.store.get(id).await?)
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<Job>, JobQueueError> {
        Ok(self.store.list(limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gate(max_payload_bytes: usize) -> SubmissionGate {
        SubmissionGate::new(
            &Backend::in_memory(),
            GateConfig {
                max_payload_bytes,
                ..GateConfig::default()
            },
        )
    }

    #[test]
    fn rejects_missing_fields_in_order() {
        let g = gate(1024);
        let err = g.validate(SubmitRequest::default()).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("job_type"));

        let req = SubmitRequest {
            job_type: Some("send_email".into()),
            priority: Some("high".into()),
            ..SubmitRequest::default()
        };
        assert_eq!(
            g.validate(req).unwrap_err(),
            ValidationError::MissingField("payload")
        );
    }

    #[test]
    fn rejects_oversized_payload() {
        let g = gate(16);
        let req = SubmitRequest::new("send_email", "low", json!({"to": "someone@example.com"}));
        assert!(matches!(
            g.validate(req),
            Err(ValidationError::PayloadTooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn applies_default_and_explicit_max_attempts() {
        let g = gate(1024);
        let job = g
            .validate(SubmitRequest::new("send_email", "high", json!({})))
            .unwrap();
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.priority, Priority::High);

        let mut req = SubmitRequest::new("send_email", "high", json!({}));
        req.max_attempts = Some(0);
        assert_eq!(
            g.validate(req).unwrap_err(),
            ValidationError::InvalidMaxAttempts { got: 0, max: 1000 }
        );
    }

    #[test]
    fn max_attempts_above_limit_is_rejected() {
        let g = gate(1024);
        let mut req = SubmitRequest::new("send_email", "low", json!({}));
        req.max_attempts = Some(i32::MAX as u32 + 1);
        assert!(matches!(
            g.validate(req),
            Err(ValidationError::InvalidMaxAttempts { max: MAX_ATTEMPTS_LIMIT, .. })
        ));

        let mut req = SubmitRequest::new("send_email", "low", json!({}));
        req.max_attempts = Some(MAX_ATTEMPTS_LIMIT);
        assert_eq!(g.validate(req).unwrap().max_attempts, MAX_ATTEMPTS_LIMIT);
    }

    #[test]
    fn null_payload_is_present_but_absent_payload_is_missing() {
        let g = gate(1024);
        let req: SubmitRequest = serde_json::from_value(json!({
            "job_type": "send_email",
            "priority": "high",
            "payload": null,
        }))
        .unwrap();
        assert_eq!(req.payload, Some(Value::Null));
        assert_eq!(g.validate(req).unwrap().payload, Value::Null);

        let req: SubmitRequest =
            serde_json::from_value(json!({"job_type": "send_email", "priority": "high"})).unwrap();
        assert_eq!(
            g.validate(req).unwrap_err(),
            ValidationError::MissingField("payload")
        );
    }
}
