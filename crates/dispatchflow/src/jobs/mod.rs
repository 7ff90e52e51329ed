pub mod dispatch;
pub mod error_codes;
pub mod lifecycle;
pub mod memory;
pub mod model;
pub mod registry;
pub mod repo;
pub mod retry;
pub mod runner;
pub mod store;
pub mod submission;

#[cfg(feature = "redis")]
pub mod redis_store;

pub use dispatch::DispatchQueue;
pub use memory::{InMemoryDispatchQueue, InMemoryJobStore};
pub use model::{Job, JobId, JobPatch, JobStatus, JobType, NewJob, Priority};
pub use registry::{HandlerRegistry, JobContext, JobError};
pub use repo::{DispatchRepo, JobsRepo};
pub use runner::{JobRunner, SkipReason, TickOutcome, WorkerConfig};
pub use store::JobStore;
pub use submission::{GateConfig, SubmissionGate, SubmitRequest};
