pub mod api;
pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod telemetry;

pub use backend::Backend;
pub use error::{JobQueueError, StoreError, ValidationError};
