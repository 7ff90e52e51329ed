use async_trait::async_trait;

use crate::error::StoreError;
use crate::jobs::model::{Job, JobId, JobPatch, NewJob};

pub const MAX_LIST_LIMIT: usize = 500;

/// Durable map from job id to job record.
///
/// Every method is a single atomic operation against the backing store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Assign an id and persist the initial record.
    async fn create(&self, job: NewJob) -> Result<JobId, StoreError>;

    /// Full snapshot of the record, or `StoreError::NotFound`.
    async fn get(&self, id: JobId) -> Result<Job, StoreError>;

    /// Overlay the fields present in `patch`. Never recreates a missing record.
    async fn merge_update(&self, id: JobId, patch: &JobPatch) -> Result<(), StoreError>;

    /// Newest first, `limit` clamped to [1, MAX_LIST_LIMIT].
    async fn list(&self, limit: usize) -> Result<Vec<Job>, StoreError>;

    /// External purge. Returns whether a record was removed.
    async fn remove(&self, id: JobId) -> Result<bool, StoreError>;
}

pub(crate) fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, MAX_LIST_LIMIT)
}
