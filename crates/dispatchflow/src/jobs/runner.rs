use crate::backend::Backend;
use crate::error::StoreError;
use crate::jobs::{
    dispatch::DispatchQueue,
    error_codes::ErrorCode,
    model::{Job, JobId, JobPatch, JobStatus},
    registry::{HandlerRegistry, JobContext, JobError},
    retry::{classify_error, next_delay, ErrorClass, RetryConfig},
    store::JobStore,
};
use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Wait after finding the queue empty.
    pub poll_interval: Duration,
    pub retry: RetryConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-1".to_string(),
            poll_interval: Duration::from_secs(1),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Id was claimed but the record is gone.
    MissingRecord,
    /// Record is already completed/failed.
    Terminal(JobStatus),
    /// Record is in a state that cannot be claimed (e.g. already processing).
    NotClaimable(JobStatus),
}

/// What a single pass of the worker loop did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Idle,
    Skipped {
        job_id: JobId,
        reason: SkipReason,
    },
    Completed {
        job_id: JobId,
        attempt_no: u32,
    },
    Retrying {
        job_id: JobId,
        attempt_no: u32,
        delay: Duration,
        error_code: String,
    },
    Failed {
        job_id: JobId,
        attempts: u32,
        error_code: Option<String>,
    },
}

#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn DispatchQueue>,
    registry: Arc<HandlerRegistry>,
    cfg: WorkerConfig,
}

impl JobRunner {
    pub fn new(backend: &Backend, registry: Arc<HandlerRegistry>, cfg: WorkerConfig) -> Self {
        Self {
            store: backend.store(),
            queue: backend.queue(),
            registry,
            cfg,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.cfg.worker_id
    }

    /// Drain the queue until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        info!(worker_id = %self.cfg.worker_id, "worker loop starting");

        while !*shutdown.borrow() {
            if self.run_once().await? != TickOutcome::Idle {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.cfg.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.cfg.worker_id, "worker loop stopped");
        Ok(())
    }

    /// Claim the best-ranked job, run it, and apply the retry policy.
    pub async fn run_once(&self) -> Result<TickOutcome, StoreError> {
        let Some(job_id) = self.queue.dequeue_best().await? else {
            debug!(worker_id = %self.cfg.worker_id, "no jobs in queue");
            return Ok(TickOutcome::Idle);
        };

        let job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => return Ok(self.skip_missing(job_id)),
            Err(e) => return Err(e),
        };

        match self.process(job).await {
            Err(StoreError::NotFound(_)) => Ok(self.skip_missing(job_id)),
            other => other,
        }
    }

    fn skip_missing(&self, job_id: JobId) -> TickOutcome {
        warn!(worker_id = %self.cfg.worker_id, %job_id, "job not found, skipping");
        TickOutcome::Skipped {
            job_id,
            reason: SkipReason::MissingRecord,
        }
    }

    #[instrument(
        skip_all,
        fields(worker_id = %self.cfg.worker_id, job_id = %job.id, job_type = %job.job_type)
    )]
    async fn process(&self, job: Job) -> Result<TickOutcome, StoreError> {
        if job.status.is_terminal() {
            warn!(status = %job.status, "terminal job was still queued, skipping");
            return Ok(TickOutcome::Skipped {
                job_id: job.id,
                reason: SkipReason::Terminal(job.status),
            });
        }

        if job.attempts_exhausted() {
            warn!(
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "job has reached max attempts"
            );
            self.write(&job, JobPatch::failed(Utc::now())).await?;
            return Ok(TickOutcome::Failed {
                job_id: job.id,
                attempts: job.attempts,
                error_code: job.last_error_code.clone(),
            });
        }

        if !job.status.can_transition_to(JobStatus::Processing) {
            warn!(status = %job.status, "job cannot be claimed in its current state");
            return Ok(TickOutcome::Skipped {
                job_id: job.id,
                reason: SkipReason::NotClaimable(job.status),
            });
        }

        let attempt_no = job.attempts + 1;
        self.write(&job, JobPatch::claimed(attempt_no, Utc::now()))
            .await?;
        info!(attempt_no, max_attempts = job.max_attempts, "picked job");

        let ctx = JobContext {
            job_id: job.id,
            attempt_no,
            worker_id: self.cfg.worker_id.clone(),
        };
        let result = match self.registry.handler_for(job.job_type) {
            Some(entry) => entry.run(job.payload.clone(), ctx).await,
            None => Err(JobError::from_code(
                ErrorCode::UnknownJobType,
                format!("no handler for job_type={}", job.job_type),
            )),
        };

        match result {
            Ok(()) => self.on_success(&job, attempt_no).await,
            Err(err) => self.on_failure(&job, attempt_no, err).await,
        }
    }

    async fn on_success(&self, job: &Job, attempt_no: u32) -> Result<TickOutcome, StoreError> {
        self.write_from(job.id, JobStatus::Processing, JobPatch::completed(Utc::now()))
            .await?;
        info!(attempt_no, "job completed successfully");

        Ok(TickOutcome::Completed {
            job_id: job.id,
            attempt_no,
        })
    }

    async fn on_failure(
        &self,
        job: &Job,
        attempt_no: u32,
        err: JobError,
    ) -> Result<TickOutcome, StoreError> {
        let class = classify_error(err.code);
        let can_retry = class == ErrorClass::Retryable && attempt_no < job.max_attempts;

        if can_retry {
            let mut rng = StdRng::from_entropy();
            let delay = next_delay(attempt_no, &self.cfg.retry, &mut rng);
            let retry_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

            self.write_from(
                job.id,
                JobStatus::Processing,
                JobPatch::retry_scheduled(retry_at).with_error(err.code, &err.message),
            )
            .await?;
            self.queue
                .enqueue_delayed(job.id, job.priority.score(), delay)
                .await?;

            warn!(
                attempt_no,
                code = err.code,
                error = %err.message,
                delay_ms = delay.as_millis() as u64,
                "job failed, retry scheduled"
            );
            return Ok(TickOutcome::Retrying {
                job_id: job.id,
                attempt_no,
                delay,
                error_code: err.code.to_string(),
            });
        }

        self.write_from(
            job.id,
            JobStatus::Processing,
            JobPatch::failed(Utc::now()).with_error(err.code, &err.message),
        )
        .await?;

        match class {
            ErrorClass::NonRetryable => error!(
                attempt_no,
                code = err.code,
                error = %err.message,
                "job failed with non-retryable error"
            ),
            ErrorClass::Retryable => error!(
                attempt_no,
                code = err.code,
                error = %err.message,
                "job permanently failed after max attempts"
            ),
        }

        Ok(TickOutcome::Failed {
            job_id: job.id,
            attempts: attempt_no,
            error_code: Some(err.code.to_string()),
        })
    }

    async fn write(&self, job: &Job, patch: JobPatch) -> Result<(), StoreError> {
        self.write_from(job.id, job.status, patch).await
    }

    async fn write_from(
        &self,
        id: JobId,
        from: JobStatus,
        patch: JobPatch,
    ) -> Result<(), StoreError> {
        if let Some(to) = patch.status {
            if let Err(illegal) = from.transition(to) {
                return Err(StoreError::Backend(format!("job {id}: {illegal}")));
            }
        }
        self.store.merge_update(id, &patch).await
    }
}
