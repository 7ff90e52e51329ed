//! In-process backend for tests and local runs.
//!
//! Each structure sits behind a single mutex; no lock is held across an await,
//! so every trait method is one critical section.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;
use uuid::Uuid;

use crate::error::StoreError;
use crate::jobs::dispatch::DispatchQueue;
use crate::jobs::model::{Job, JobId, JobPatch, NewJob};
use crate::jobs::store::{clamp_limit, JobStore};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    #[instrument(skip_all, fields(job_type = %job.job_type, priority = %job.priority))]
    async fn create(&self, job: NewJob) -> Result<JobId, StoreError> {
        let id = Uuid::new_v4();
        lock(&self.jobs).insert(id, Job::from_new(id, job));
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        lock(&self.jobs)
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    #[instrument(skip(self, patch), fields(status = ?patch.status))]
    async fn merge_update(&self, id: JobId, patch: &JobPatch) -> Result<(), StoreError> {
        let mut jobs = lock(&self.jobs);
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.apply(patch);
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<Job>, StoreError> {
        let mut out: Vec<Job> = lock(&self.jobs).values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out.truncate(clamp_limit(limit));
        Ok(out)
    }

    async fn remove(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(lock(&self.jobs).remove(&id).is_some())
    }
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Ready(u32),
    Delayed { score: u32, ready_at: Instant },
}

#[derive(Debug, Default)]
struct QueueState {
    entries: HashMap<JobId, Entry>,
    ready: BTreeSet<(u32, JobId)>,
    delayed: BTreeSet<(Instant, JobId)>,
}

impl QueueState {
    fn detach(&mut self, id: JobId) {
        match self.entries.remove(&id) {
            Some(Entry::Ready(score)) => {
                self.ready.remove(&(score, id));
            }
            Some(Entry::Delayed { ready_at, .. }) => {
                self.delayed.remove(&(ready_at, id));
            }
            None => {}
        }
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some(&(ready_at, id)) = self.delayed.first() {
            if ready_at > now {
                break;
            }
            self.delayed.pop_first();
            if let Some(Entry::Delayed { score, .. }) = self.entries.get(&id).copied() {
                self.ready.insert((score, id));
                self.entries.insert(id, Entry::Ready(score));
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDispatchQueue {
    state: Mutex<QueueState>,
}

impl InMemoryDispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DispatchQueue for InMemoryDispatchQueue {
    async fn enqueue(&self, id: JobId, score: u32) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        state.detach(id);
        state.entries.insert(id, Entry::Ready(score));
        state.ready.insert((score, id));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn enqueue_delayed(
        &self,
        id: JobId,
        score: u32,
        delay: Duration,
    ) -> Result<(), StoreError> {
        let ready_at = Instant::now() + delay;
        let mut state = lock(&self.state);
        state.detach(id);
        state.entries.insert(id, Entry::Delayed { score, ready_at });
        state.delayed.insert((ready_at, id));
        Ok(())
    }

    async fn dequeue_best(&self) -> Result<Option<JobId>, StoreError> {
        let mut state = lock(&self.state);
        state.promote_due(Instant::now());
        let Some((_, id)) = state.ready.pop_first() else {
            return Ok(None);
        };
        state.entries.remove(&id);
        Ok(Some(id))
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.state).entries.len())
    }

    async fn contains(&self, id: JobId) -> Result<bool, StoreError> {
        Ok(lock(&self.state).entries.contains_key(&id))
    }
}
