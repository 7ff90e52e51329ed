use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};
use tokio::time::timeout;

use crate::jobs::error_codes::ErrorCode;
use crate::jobs::model::{JobId, JobType};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type HandlerFn =
    dyn Fn(Value, JobContext) -> BoxFuture<'static, Result<(), JobError>> + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobError {
    pub code: &'static str,
    pub message: String,
}

impl JobError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code.as_str(), message)
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for JobError {}

/// What a handler knows about the run it is part of.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub attempt_no: u32,
    pub worker_id: String,
}

#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<HandlerFn>,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<JobType, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, job_type: JobType, handler: F)
    where
        F: Fn(Value, JobContext) -> BoxFuture<'static, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    {
        self.register_with_options(job_type, handler, HandlerOptions::new());
    }

    pub fn register_with_options<F>(&mut self, job_type: JobType, handler: F, opts: HandlerOptions)
    where
        F: Fn(Value, JobContext) -> BoxFuture<'static, Result<(), JobError>>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.insert(
            job_type,
            HandlerEntry {
                handler: Arc::new(handler),
                timeout: opts.timeout,
            },
        );
    }

    pub fn handler_for(&self, job_type: JobType) -> Option<HandlerEntry> {
        self.handlers.get(&job_type).cloned()
    }
}

#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    timeout: Option<Duration>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }
}

impl HandlerEntry {
    /// Run the handler on its own task so a panic comes back as a `PANIC` failure.
    pub async fn run(&self, payload: Value, ctx: JobContext) -> Result<(), JobError> {
        let fut = (self.handler)(payload, ctx);
        let task = tokio::spawn(fut);
        let abort = task.abort_handle();

        let joined = if let Some(dur) = self.timeout {
            match timeout(dur, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    return Err(JobError::from_code(
                        ErrorCode::Timeout,
                        format!("handler timeout after {}ms", dur.as_millis()),
                    ));
                }
            }
        } else {
            task.await
        };

        match joined {
            Ok(res) => res,
            Err(e) if e.is_panic() => Err(JobError::from_code(
                ErrorCode::Panic,
                panic_message(e.into_panic()),
            )),
            Err(e) => Err(JobError::from_code(ErrorCode::Unknown, e.to_string())),
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

pub fn parse_payload<T: DeserializeOwned>(payload: Value) -> Result<T, JobError> {
    serde_json::from_value(payload)
        .map_err(|e| JobError::from_code(ErrorCode::BadPayload, e.to_string()))
}

pub fn boxed<'a, T>(fut: impl Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}
