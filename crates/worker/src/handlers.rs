use std::sync::Arc;
use std::time::Duration;

use dispatchflow::jobs::error_codes::ErrorCode;
use dispatchflow::jobs::model::JobType;
use dispatchflow::jobs::registry::{
    boxed, parse_payload, HandlerOptions, HandlerRegistry, JobContext, JobError,
};
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

const EMAIL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct EmailPayload {
    to: String,
    subject: Option<String>,
    message: Option<String>,
}

/// Handlers for every job type this worker knows. `failure_rate` is the
/// probability that a simulated delivery fails.
pub fn build_registry(failure_rate: f64) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    registry.register_with_options(
        JobType::SendEmail,
        move |payload, ctx| boxed(send_email(payload, ctx, failure_rate)),
        HandlerOptions::new().timeout(EMAIL_TIMEOUT),
    );

    Arc::new(registry)
}

async fn send_email(payload: Value, ctx: JobContext, failure_rate: f64) -> Result<(), JobError> {
    let email: EmailPayload = parse_payload(payload)?;
    if !email.to.contains('@') {
        return Err(JobError::from_code(
            ErrorCode::BadPayload,
            format!("invalid recipient {:?}", email.to),
        ));
    }

    // Roll before awaiting: ThreadRng is not Send.
    let (work_ms, roll) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(50..250u64), rng.gen::<f64>())
    };
    tokio::time::sleep(Duration::from_millis(work_ms)).await;

    if roll < failure_rate {
        return Err(JobError::from_code(
            ErrorCode::DeliveryFailed,
            format!("simulated delivery failure to {}", email.to),
        ));
    }

    info!(
        job_id = %ctx.job_id,
        attempt_no = ctx.attempt_no,
        to = %email.to,
        subject = email.subject.as_deref().unwrap_or(""),
        message_len = email.message.as_deref().map(str::len).unwrap_or(0),
        "email sent"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> JobContext {
        JobContext {
            job_id: Uuid::new_v4(),
            attempt_no: 1,
            worker_id: "worker-test".into(),
        }
    }

    async fn run(failure_rate: f64, payload: Value) -> Result<(), JobError> {
        let registry = build_registry(failure_rate);
        let entry = registry.handler_for(JobType::SendEmail).unwrap();
        entry.run(payload, ctx()).await
    }

    #[tokio::test]
    async fn delivers_when_failure_rate_is_zero() {
        let res = run(0.0, json!({"to": "a@example.com", "subject": "hi"})).await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn always_fails_when_failure_rate_is_one() {
        let err = run(1.0, json!({"to": "a@example.com"})).await.unwrap_err();
        assert_eq!(err.code, "DELIVERY_FAILED");
    }

    #[tokio::test]
    async fn bad_payload_is_rejected_before_any_work() {
        let err = run(0.0, json!({"subject": "no recipient"})).await.unwrap_err();
        assert_eq!(err.code, "BAD_PAYLOAD");

        let err = run(0.0, json!({"to": "nobody"})).await.unwrap_err();
        assert_eq!(err.code, "BAD_PAYLOAD");
    }
}
