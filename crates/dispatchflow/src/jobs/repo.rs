// crates/dispatchflow/src/jobs/repo.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::error::StoreError;
use crate::jobs::dispatch::DispatchQueue;
use crate::jobs::model::{Job, JobId, JobPatch, NewJob};
use crate::jobs::store::{clamp_limit, JobStore};

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    priority: String,
    payload_json: Value,
    status: String,
    attempts: i32,
    max_attempts: i32,

    created_at: DateTime<Utc>,
    picked_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    retry_at: Option<DateTime<Utc>>,

    last_error_code: Option<String>,
    last_error_message: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };

        Ok(Job {
            id,
            job_type: row.job_type.parse().map_err(|e| corrupt(format!("{e}")))?,
            priority: row.priority.parse().map_err(|e| corrupt(format!("{e}")))?,
            payload: row.payload_json,
            status: row.status.parse().map_err(corrupt)?,
            attempts: u32::try_from(row.attempts)
                .map_err(|_| corrupt(format!("negative attempts {}", row.attempts)))?,
            max_attempts: u32::try_from(row.max_attempts)
                .map_err(|_| corrupt(format!("negative max_attempts {}", row.max_attempts)))?,
            created_at: row.created_at,
            picked_at: row.picked_at,
            completed_at: row.completed_at,
            failed_at: row.failed_at,
            retry_at: row.retry_at,
            last_error_code: row.last_error_code,
            last_error_message: row.last_error_message,
        })
    }
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Job Record Store on the `jobs` table.
#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobsRepo {
    #[instrument(skip_all, err, fields(job_type = %job.job_type, priority = %job.priority))]
    async fn create(&self, job: NewJob) -> Result<JobId, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, job_type, priority, payload_json, status, attempts, max_attempts, created_at)
            VALUES ($1, $2, $3, $4, 'queued', 0, $5, $6)
            "#,
        )
        .bind(id)
        .bind(job.job_type.as_str())
        .bind(job.priority.as_str())
        .bind(&job.payload)
        .bind(to_i32(job.max_attempts))
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or(StoreError::NotFound(id))?.try_into()
    }

    /// One UPDATE statement; absent patch fields keep their stored value.
    #[instrument(skip(self, patch), err, fields(status = ?patch.status))]
    async fn merge_update(&self, id: JobId, patch: &JobPatch) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = COALESCE($2, status),
                attempts = COALESCE($3, attempts),
                picked_at = COALESCE($4, picked_at),
                completed_at = COALESCE($5, completed_at),
                failed_at = COALESCE($6, failed_at),
                retry_at = COALESCE($7, retry_at),
                last_error_code = COALESCE($8, last_error_code),
                last_error_message = COALESCE($9, last_error_message)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.attempts.map(to_i32))
        .bind(patch.picked_at)
        .bind(patch.completed_at)
        .bind(patch.failed_at)
        .bind(patch.retry_at)
        .bind(patch.last_error_code.as_deref())
        .bind(patch.last_error_message.as_deref())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT *
            FROM jobs
            ORDER BY created_at DESC, id DESC
            LIMIT $1
            "#,
        )
        .bind(clamp_limit(limit) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }

    async fn remove(&self, id: JobId) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

/// Priority Dispatch Queue on the `dispatch_queue` table.
#[derive(Clone)]
pub struct DispatchRepo {
    pool: PgPool,
}

impl DispatchRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert(&self, id: JobId, score: u32, delay_ms: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO dispatch_queue (job_id, score, ready_at)
            VALUES ($1, $2, now() + ($3::bigint * interval '1 millisecond'))
            ON CONFLICT (job_id) DO UPDATE
            SET score = EXCLUDED.score,
                ready_at = EXCLUDED.ready_at
            "#,
        )
        .bind(id)
        .bind(to_i32(score))
        .bind(delay_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DispatchQueue for DispatchRepo {
    async fn enqueue(&self, id: JobId, score: u32) -> Result<(), StoreError> {
        self.upsert(id, score, 0).await
    }

    #[instrument(skip(self), err)]
    async fn enqueue_delayed(
        &self,
        id: JobId,
        score: u32,
        delay: Duration,
    ) -> Result<(), StoreError> {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        self.upsert(id, score, delay_ms).await
    }

    /// Claim: SKIP LOCKED lets concurrent callers pass over a row another
    /// transaction is deleting, so no two callers get the same id.
    async fn dequeue_best(&self) -> Result<Option<JobId>, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            DELETE FROM dispatch_queue
            WHERE job_id = (
                SELECT job_id
                FROM dispatch_queue
                WHERE ready_at <= now()
                ORDER BY score ASC, job_id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING job_id
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dispatch_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as usize)
    }

    async fn contains(&self, id: JobId) -> Result<bool, StoreError> {
        let found: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM dispatch_queue WHERE job_id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }
}
