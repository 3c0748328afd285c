//! Transcription lifecycle endpoints: dispatch, retry, cancel.

use axum::extract::{Path, State};
use axum::response::Json;
use uuid::Uuid;

use crate::runtime::orchestrator::CancelOutcome;
use crate::state::AppState;

use super::auth::CurrentUser;
use super::ApiResult;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/start
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn start(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let receipt = state.orchestrator.start_transcription(user.id, id)?;
    Ok(Json(serde_json::json!({
        "job_id": receipt.job_id,
        "estimated_completion_minutes": receipt.estimated_completion_minutes,
        "retry": receipt.retry,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn retry(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let receipt = state.orchestrator.retry_transcription(user.id, id)?;
    Ok(Json(serde_json::json!({
        "job_id": receipt.job_id,
        "estimated_completion_minutes": receipt.estimated_completion_minutes,
        "retry": receipt.retry,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/cancel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn cancel(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let outcome = state.orchestrator.cancel(user.id, id)?;
    let status = match outcome {
        CancelOutcome::Cancelled => "cancelled",
        CancelOutcome::CancellationRequested => "cancellation_requested",
    };
    Ok(Json(serde_json::json!({ "status": status })))
}
