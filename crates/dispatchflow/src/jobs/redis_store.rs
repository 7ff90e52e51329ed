//! Redis backend (feature `redis`).
//!
//! Layout:
//! - `job:{id}`          hash, one field per record column
//! - `job_index`         sorted set, id scored by `created_at` millis (listing)
//! - `job_queue`         sorted set, ready ids scored by dispatch score
//! - `job_queue:delayed` sorted set, delayed ids scored by ready time (server millis)
//! - `job_queue:scores`  hash, dispatch score of each delayed id
//!
//! Claim and merge run as Lua scripts so each is a single atomic step.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::error::StoreError;
use crate::jobs::dispatch::DispatchQueue;
use crate::jobs::model::{Job, JobId, JobPatch, NewJob};
use crate::jobs::store::{clamp_limit, JobStore};

const INDEX_KEY: &str = "job_index";
const QUEUE_KEY: &str = "job_queue";
const DELAYED_KEY: &str = "job_queue:delayed";
const SCORES_KEY: &str = "job_queue:scores";

const MERGE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return 0
end
if #ARGV > 0 then
  redis.call('HSET', KEYS[1], unpack(ARGV))
end
return 1
"#;

const DELAY_SCRIPT: &str = r#"
local t = redis.call('TIME')
local now_ms = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], now_ms + tonumber(ARGV[3]), ARGV[1])
redis.call('HSET', KEYS[3], ARGV[1], ARGV[2])
return 1
"#;

const DEQUEUE_SCRIPT: &str = r#"
local t = redis.call('TIME')
local now_ms = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now_ms)
for _, id in ipairs(due) do
  local score = redis.call('HGET', KEYS[3], id)
  redis.call('ZREM', KEYS[2], id)
  redis.call('HDEL', KEYS[3], id)
  if score then
    redis.call('ZADD', KEYS[1], score, id)
  end
end
local top = redis.call('ZPOPMIN', KEYS[1])
if #top == 0 then
  return false
end
return top[1]
"#;

fn job_key(id: JobId) -> String {
    format!("job:{id}")
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn patch_fields(patch: &JobPatch) -> Vec<(&'static str, String)> {
    let mut fields = Vec::new();
    if let Some(status) = patch.status {
        fields.push(("status", status.as_str().to_string()));
    }
    if let Some(attempts) = patch.attempts {
        fields.push(("attempts", attempts.to_string()));
    }
    if let Some(at) = patch.picked_at {
        fields.push(("picked_at", ts(at)));
    }
    if let Some(at) = patch.completed_at {
        fields.push(("completed_at", ts(at)));
    }
    if let Some(at) = patch.failed_at {
        fields.push(("failed_at", ts(at)));
    }
    if let Some(at) = patch.retry_at {
        fields.push(("retry_at", ts(at)));
    }
    if let Some(code) = &patch.last_error_code {
        fields.push(("last_error_code", code.clone()));
    }
    if let Some(message) = &patch.last_error_message {
        fields.push(("last_error_message", message.clone()));
    }
    fields
}

fn decode_job(id: JobId, mut h: HashMap<String, String>) -> Result<Job, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt { id, reason };

    let mut required = |field: &str| {
        h.remove(field)
            .ok_or_else(|| corrupt(format!("missing field {field}")))
    };
    let job_type = required("job_type")?;
    let priority = required("priority")?;
    let payload = required("payload")?;
    let status = required("status")?;
    let attempts = required("attempts")?;
    let max_attempts = required("max_attempts")?;
    let created_at = required("created_at")?;

    let time = |raw: &str| {
        DateTime::parse_from_rfc3339(raw)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("bad timestamp {raw}: {e}")))
    };
    let opt_time = |field: &str| h.get(field).map(|raw| time(raw)).transpose();

    Ok(Job {
        id,
        job_type: job_type.parse().map_err(|e| corrupt(format!("{e}")))?,
        priority: priority.parse().map_err(|e| corrupt(format!("{e}")))?,
        payload: serde_json::from_str(&payload).map_err(|e| corrupt(e.to_string()))?,
        status: status.parse().map_err(corrupt)?,
        attempts: attempts.parse().map_err(|_| corrupt(format!("bad attempts {attempts}")))?,
        max_attempts: max_attempts
            .parse()
            .map_err(|_| corrupt(format!("bad max_attempts {max_attempts}")))?,
        created_at: time(&created_at)?,
        picked_at: opt_time("picked_at")?,
        completed_at: opt_time("completed_at")?,
        failed_at: opt_time("failed_at")?,
        retry_at: opt_time("retry_at")?,
        last_error_code: h.get("last_error_code").cloned(),
        last_error_message: h.get("last_error_message").cloned(),
    })
}

#[derive(Clone)]
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    merge_script: Script,
}

impl RedisJobStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            merge_script: Script::new(MERGE_SCRIPT),
        }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    #[instrument(skip_all, err, fields(job_type = %job.job_type, priority = %job.priority))]
    async fn create(&self, job: NewJob) -> Result<JobId, StoreError> {
        let id = Uuid::new_v4();
        let payload = serde_json::to_string(&job.payload)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let fields = [
            ("job_type", job.job_type.as_str().to_string()),
            ("priority", job.priority.as_str().to_string()),
            ("payload", payload),
            ("status", "queued".to_string()),
            ("attempts", "0".to_string()),
            ("max_attempts", job.max_attempts.to_string()),
            ("created_at", ts(job.created_at)),
        ];

        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset_multiple(job_key(id), &fields)
            .ignore()
            .zadd(INDEX_KEY, id.to_string(), job.created_at.timestamp_millis())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        let mut conn = self.conn.clone();
        let h: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(job_key(id))
            .query_async(&mut conn)
            .await?;
        if h.is_empty() {
            return Err(StoreError::NotFound(id));
        }
        decode_job(id, h)
    }

    #[instrument(skip(self, patch), err, fields(status = ?patch.status))]
    async fn merge_update(&self, id: JobId, patch: &JobPatch) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let mut invocation = self.merge_script.prepare_invoke();
        invocation.key(job_key(id));
        for (field, value) in patch_fields(patch) {
            invocation.arg(field).arg(value);
        }

        let updated: i64 = invocation.invoke_async(&mut conn).await?;
        if updated == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        let mut conn = self.conn.clone();
        let stop = clamp_limit(limit) as isize - 1;
        let ids: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(INDEX_KEY)
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await?;

        let mut out = Vec::with_capacity(ids.len());
        for raw in ids {
            let Ok(id) = raw.parse::<Uuid>() else {
                continue;
            };
            match self.get(id).await {
                Ok(job) => out.push(job),
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    async fn remove(&self, id: JobId) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let (deleted, _): (i64, i64) = redis::pipe()
            .atomic()
            .del(job_key(id))
            .zrem(INDEX_KEY, id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(deleted > 0)
    }
}

#[derive(Clone)]
pub struct RedisDispatchQueue {
    conn: MultiplexedConnection,
    delay_script: Script,
    dequeue_script: Script,
}

impl RedisDispatchQueue {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            delay_script: Script::new(DELAY_SCRIPT),
            dequeue_script: Script::new(DEQUEUE_SCRIPT),
        }
    }
}

#[async_trait]
impl DispatchQueue for RedisDispatchQueue {
    async fn enqueue(&self, id: JobId, score: u32) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let member = id.to_string();
        redis::pipe()
            .atomic()
            .zrem(DELAYED_KEY, &member)
            .ignore()
            .hdel(SCORES_KEY, &member)
            .ignore()
            .zadd(QUEUE_KEY, &member, score)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn enqueue_delayed(
        &self,
        id: JobId,
        score: u32,
        delay: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let _: i64 = self
            .delay_script
            .key(QUEUE_KEY)
            .key(DELAYED_KEY)
            .key(SCORES_KEY)
            .arg(id.to_string())
            .arg(score)
            .arg(delay_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dequeue_best(&self) -> Result<Option<JobId>, StoreError> {
        let mut conn = self.conn.clone();
        let popped: Option<String> = self
            .dequeue_script
            .key(QUEUE_KEY)
            .key(DELAYED_KEY)
            .key(SCORES_KEY)
            .invoke_async(&mut conn)
            .await?;

        match popped {
            None => Ok(None),
            Some(raw) => raw
                .parse::<Uuid>()
                .map(Some)
                .map_err(|e| StoreError::Backend(format!("bad queue member {raw}: {e}"))),
        }
    }

    async fn len(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let (ready, delayed): (usize, usize) = redis::pipe()
            .zcard(QUEUE_KEY)
            .zcard(DELAYED_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(ready + delayed)
    }

    async fn contains(&self, id: JobId) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let member = id.to_string();
        let (ready, delayed): (Option<f64>, Option<f64>) = redis::pipe()
            .zscore(QUEUE_KEY, &member)
            .zscore(DELAYED_KEY, &member)
            .query_async(&mut conn)
            .await?;
        Ok(ready.is_some() || delayed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::JobStatus;

    #[test]
    fn patch_fields_skip_absent_values() {
        let at = Utc::now();
        let fields = patch_fields(&JobPatch::claimed(2, at));
        assert_eq!(
            fields,
            vec![
                ("status", "processing".to_string()),
                ("attempts", "2".to_string()),
                ("picked_at", ts(at)),
            ]
        );
        assert!(patch_fields(&JobPatch::default()).is_empty());
    }

    #[test]
    fn decodes_stored_hash() {
        let id = Uuid::new_v4();
        let created = Utc::now();
        let h: HashMap<String, String> = [
            ("job_type", "send_email".to_string()),
            ("priority", "high".to_string()),
            ("payload", r#"{"to":"a@x"}"#.to_string()),
            ("status", "retry_scheduled".to_string()),
            ("attempts", "1".to_string()),
            ("max_attempts", "3".to_string()),
            ("created_at", ts(created)),
            ("last_error_code", "TIMEOUT".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let job = decode_job(id, h).unwrap();
        assert_eq!(job.status, JobStatus::RetryScheduled);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.payload["to"], "a@x");
        assert_eq!(job.created_at.timestamp_micros(), created.timestamp_micros());
        assert_eq!(job.picked_at, None);
        assert_eq!(job.last_error_code.as_deref(), Some("TIMEOUT"));
    }

    #[test]
    fn missing_field_is_corrupt() {
        let id = Uuid::new_v4();
        let err = decode_job(id, HashMap::new()).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
