#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dispatchflow::jobs::error_codes::ErrorCode;
use dispatchflow::jobs::registry::{boxed, HandlerRegistry, JobError};
use dispatchflow::jobs::retry::RetryConfig;
use dispatchflow::jobs::{
    DispatchQueue, GateConfig, InMemoryJobStore, JobId, JobRunner, JobStatus, JobStore,
    SubmissionGate, SubmitRequest, TickOutcome, WorkerConfig,
};
use dispatchflow::{Backend, StoreError};
use serde_json::{json, Value};

/// Every handler invocation, in call order.
#[derive(Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<(JobId, u32)>>>,
}

impl Recorder {
    pub fn calls(&self) -> Vec<(JobId, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn order(&self) -> Vec<JobId> {
        self.calls().into_iter().map(|(id, _)| id).collect()
    }

    pub fn count_for(&self, id: JobId) -> usize {
        self.calls().iter().filter(|(j, _)| *j == id).count()
    }
}

/// `send_email` handler driven by the payload: fails the first `fail_times`
/// attempts with `code` (default `DELIVERY_FAILED`), then succeeds.
pub fn scripted_registry(rec: Recorder) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(dispatchflow::jobs::JobType::SendEmail, move |payload, ctx| {
        let rec = rec.clone();
        boxed(async move {
            rec.calls.lock().unwrap().push((ctx.job_id, ctx.attempt_no));

            let fail_times = payload
                .get("fail_times")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32;
            if ctx.attempt_no <= fail_times {
                let code = payload
                    .get("code")
                    .and_then(Value::as_str)
                    .map(|c| ErrorCode::parse(c).as_str())
                    .unwrap_or("DELIVERY_FAILED");
                return Err(JobError::new(
                    code,
                    format!("scripted failure on attempt {}", ctx.attempt_no),
                ));
            }
            Ok(())
        })
    });
    Arc::new(registry)
}

pub fn email(to: &str) -> Value {
    json!({ "to": to, "subject": "hello", "message": "body" })
}

pub fn failing_email(to: &str, fail_times: u32) -> Value {
    json!({ "to": to, "fail_times": fail_times })
}

pub fn fast_worker(worker_id: &str) -> WorkerConfig {
    WorkerConfig {
        worker_id: worker_id.to_string(),
        poll_interval: Duration::from_millis(5),
        retry: RetryConfig {
            base: 2,
            unit: Duration::from_millis(10),
            max_delay: Duration::from_secs(60),
            jitter_pct: 0.0,
        },
    }
}

pub fn gate(backend: &Backend) -> SubmissionGate {
    SubmissionGate::new(backend, GateConfig::default())
}

pub async fn submit(gate: &SubmissionGate, priority: &str, payload: Value) -> JobId {
    gate.submit(SubmitRequest::new("send_email", priority, payload))
        .await
        .expect("submit")
}

/// Tick until every job in `ids` is terminal, sleeping through idle passes
/// so delayed retries come due.
pub async fn run_until_settled(
    runner: &JobRunner,
    backend: &Backend,
    ids: &[JobId],
) -> Vec<TickOutcome> {
    let store = backend.store();
    let mut outcomes = Vec::new();

    for _ in 0..10_000 {
        let outcome = runner.run_once().await.expect("tick");
        if outcome != TickOutcome::Idle {
            outcomes.push(outcome);
            continue;
        }

        let mut settled = true;
        for id in ids {
            let job = store.get(*id).await.expect("job exists");
            if !job.status.is_terminal() {
                settled = false;
                break;
            }
        }
        if settled {
            return outcomes;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    panic!("jobs did not settle: {outcomes:?}");
}

pub async fn status_of(backend: &Backend, id: JobId) -> JobStatus {
    backend.store().get(id).await.expect("job exists").status
}

/// Queue wrapper that remembers every delayed re-enqueue.
pub struct RecordingQueue {
    inner: Arc<dyn DispatchQueue>,
    delayed: Mutex<Vec<(JobId, u32, Duration)>>,
}

impl RecordingQueue {
    pub fn new(inner: Arc<dyn DispatchQueue>) -> Self {
        Self {
            inner,
            delayed: Mutex::new(Vec::new()),
        }
    }

    pub fn delayed(&self) -> Vec<(JobId, u32, Duration)> {
        self.delayed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DispatchQueue for RecordingQueue {
    async fn enqueue(&self, id: JobId, score: u32) -> Result<(), StoreError> {
        self.inner.enqueue(id, score).await
    }

    async fn enqueue_delayed(
        &self,
        id: JobId,
        score: u32,
        delay: Duration,
    ) -> Result<(), StoreError> {
        self.delayed.lock().unwrap().push((id, score, delay));
        self.inner.enqueue_delayed(id, score, delay).await
    }

    async fn dequeue_best(&self) -> Result<Option<JobId>, StoreError> {
        self.inner.dequeue_best().await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.inner.len().await
    }

    async fn contains(&self, id: JobId) -> Result<bool, StoreError> {
        self.inner.contains(id).await
    }
}

/// In-memory backend whose queue records delayed re-enqueues.
pub fn recording_backend() -> (Backend, Arc<RecordingQueue>) {
    let queue = Arc::new(RecordingQueue::new(Arc::new(
        dispatchflow::jobs::InMemoryDispatchQueue::new(),
    )));
    let backend = Backend::new(Arc::new(InMemoryJobStore::new()), queue.clone());
    (backend, queue)
}
