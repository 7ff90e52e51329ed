use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;
use crate::jobs::model::JobId;

/// Ordered set of pending job ids ranked by dispatch score (lower runs first).
///
/// An id is held at most once, either ready or delayed. Ties on score are
/// broken by ascending job id.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Insert or overwrite the entry for `id`, dispatchable immediately.
    async fn enqueue(&self, id: JobId, score: u32) -> Result<(), StoreError>;

    /// Insert or overwrite the entry for `id`, dispatchable once `delay` has elapsed.
    async fn enqueue_delayed(&self, id: JobId, score: u32, delay: Duration)
        -> Result<(), StoreError>;

    /// Remove and return the best ready entry in one atomic step.
    async fn dequeue_best(&self) -> Result<Option<JobId>, StoreError>;

    /// Ready plus delayed entries.
    async fn len(&self) -> Result<usize, StoreError>;

    async fn contains(&self, id: JobId) -> Result<bool, StoreError>;
}
