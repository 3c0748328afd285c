//! Session CRUD, upload handshake, and status projection.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use uuid::Uuid;

use cs_domain::error::Error;
use cs_domain::session::{SessionStatus, SttSelector};

use super::auth::CurrentUser;
use super::ApiResult;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateSessionBody {
    pub title: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub provider: SttSelector,
}

fn default_language() -> String {
    "cmn-Hant-TW".into()
}

pub async fn create_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateSessionBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let session =
        state
            .orchestrator
            .create_session(user.id, &body.title, &body.language, body.provider)?;
    Ok(Json(serde_json::to_value(&session).map_err(Error::Json)?))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "d_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn d_limit() -> usize {
    50
}

pub async fn list_sessions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()?;
    let sessions = state
        .orchestrator
        .list_sessions(user.id, status, query.limit, query.offset)?;
    let count = sessions.len();
    Ok(Json(serde_json::json!({
        "sessions": sessions,
        "count": count,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_session(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let session = state.orchestrator.get_session(user.id, id)?;
    Ok(Json(serde_json::to_value(&session).map_err(Error::Json)?))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/upload-url
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct UploadUrlBody {
    pub filename: String,
    pub file_size_mb: f64,
}

pub async fn upload_url(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UploadUrlBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let grant =
        state
            .orchestrator
            .request_upload_url(user.id, id, &body.filename, body.file_size_mb)?;
    Ok(Json(serde_json::json!({
        "upload_url": grant.url,
        "blob_path": grant.blob_path,
        "expires_at": grant.expires_at.to_rfc3339(),
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/confirm-upload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn confirm_upload(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let probe = state.orchestrator.confirm_upload(user.id, id)?;
    Ok(Json(serde_json::json!({
        "exists": probe.exists,
        "size_bytes": probe.size_bytes,
        "ready": probe.ready,
    })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let view = state.orchestrator.get_status(user.id, id)?;
    Ok(Json(serde_json::json!({
        "status": view.status,
        "progress": view.progress,
        "message": view.message,
        "started_at": view.started_at.map(|t| t.to_rfc3339()),
        "estimated_completion": view.estimated_completion.map(|t| t.to_rfc3339()),
        "processing_speed": view.processing_speed,
    })))
}
