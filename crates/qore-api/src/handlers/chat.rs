use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Json,
};
use tracing::info;

use qore_common::api::chat::{DEFAULT_MODE, DEFAULT_PERSONA, DEFAULT_USER};
use qore_common::api::{ChatRequest, FallbackResponse, QueuedResponse};
use qore_common::queue::EnqueueOutcome;

use crate::error::ApiError;
use crate::SharedState;

/// Async accept path: write a pending job and return its handle immediately.
/// When durable storage is out of reach the task runs inline and the body
/// carries an explicit `fallback` marker instead of a job id.
pub async fn post_chat(
    State(state): State<SharedState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message is required".into()));
    }

    let user_id = request.user_id.as_deref().unwrap_or(DEFAULT_USER);
    let mode = request.mode.as_deref().unwrap_or(DEFAULT_MODE);
    let persona = request.persona.as_deref().unwrap_or(DEFAULT_PERSONA);

    let outcome = state
        .producer
        .submit(user_id, &request.message, mode, request.history, persona)
        .await?;

    match outcome {
        EnqueueOutcome::Queued { job_id } => {
            info!(job_id = %job_id, "chat request queued");
            Ok(Json(QueuedResponse::new(job_id)).into_response())
        }
        EnqueueOutcome::Fallback { response, .. } => {
            Ok(Json(FallbackResponse::new(response)).into_response())
        }
    }
}
