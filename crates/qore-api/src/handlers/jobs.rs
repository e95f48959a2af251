use axum::{
    extract::{Path, State},
    Json,
};

use qore_common::api::JobStatusResponse;
use qore_common::queue::JobStore;

use crate::error::ApiError;
use crate::SharedState;

fn job_store(state: &SharedState) -> Result<&JobStore, ApiError> {
    state
        .producer
        .job_store()
        .ok_or_else(|| ApiError::ServiceUnavailable("job store not configured".into()))
}

/// Polling endpoint. A job stuck in `processing` keeps reporting
/// `processing` here; the recovery binary is what returns it to the queue.
pub async fn job_status(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let (job, _) = job_store(&state)?.fetch_job(&job_id).await?;
    Ok(Json(JobStatusResponse::from_job(&job)))
}

/// Manual re-queue of a failed job.
pub async fn retry_job(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    job_store(&state)?.retry_failed(&job_id).await?;
    Ok(Json(
        serde_json::json!({ "success": true, "status": "pending" }),
    ))
}
