use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::api::models::{ErrorBody, JobStatusResponse, ListJobsResponse, SubmitResponse};
use crate::error::{JobQueueError, StoreError};
use crate::jobs::model::JobStatus;
use crate::jobs::submission::{SubmissionGate, SubmitRequest};

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub gate: SubmissionGate,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/submit-job", post(submit_job))
        .route("/jobs", get(list_jobs))
        .route("/jobs/status/:id", get(job_status))
        .route("/health", get(health))
        .with_state(state)
}

pub struct ApiError(JobQueueError);

impl From<JobQueueError> for ApiError {
    fn from(e: JobQueueError) -> Self {
        Self(e)
    }
}

fn error_body(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: msg.into() })).into_response()
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            JobQueueError::Validation(e) => error_body(StatusCode::BAD_REQUEST, e.to_string()),
            JobQueueError::NotFound(_) => error_body(StatusCode::NOT_FOUND, "Job not found"),
            JobQueueError::Store(e @ StoreError::Unavailable(_)) => {
                error!(error = %e, "api request failed");
                error_body(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            JobQueueError::Store(e) => {
                error!(error = %e, "api request failed");
                error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        }
    }
}

pub async fn submit_job(
    State(state): State<ApiState>,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), Response> {
    let Json(req) = body.map_err(|rejection| {
        warn!(error = %rejection, "rejected submission body");
        error_body(StatusCode::BAD_REQUEST, rejection.body_text())
    })?;

    let job_id = state
        .gate
        .submit(req)
        .await
        .map_err(|e| ApiError(e).into_response())?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

pub async fn job_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let Ok(job_id) = id.parse::<Uuid>() else {
        return Err(ApiError(JobQueueError::NotFound(Uuid::nil())));
    };

    let job = state.gate.status(job_id).await?;
    Ok(Json(job.into()))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<usize>,
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let jobs = state.gate.list(q.limit.unwrap_or(100)).await?;
    Ok(Json(ListJobsResponse {
        items: jobs.into_iter().map(JobStatusResponse::from).collect(),
    }))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
