//! Transcript exports, the role overlay, and direct transcript upload.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use uuid::Uuid;

use cs_domain::error::Error;
use cs_domain::transcript::SpeakerRole;
use cs_export::ExportFormat;

use super::auth::CurrentUser;
use super::{ApiError, ApiResult};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions/:id/export?format=
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "d_format")]
    pub format: String,
}

fn d_format() -> String {
    "json".into()
}

pub async fn export_transcript(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format: ExportFormat = query.format.parse()?;
    let rendered = state.orchestrator.export(user.id, id, format)?;

    let disposition = format!("attachment; filename=\"{}\"", rendered.filename);
    Ok((
        [
            (header::CONTENT_TYPE, rendered.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        rendered.bytes,
    )
        .into_response())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/sessions/:id/speaker-roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SpeakerRolesBody {
    /// speaker id (as a JSON key) → "coach" | "client".
    pub roles: HashMap<String, String>,
}

pub async fn put_speaker_roles(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SpeakerRolesBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut roles: HashMap<u32, SpeakerRole> = HashMap::new();
    for (speaker, role) in &body.roles {
        let speaker_id: u32 = speaker.parse().map_err(|_| {
            Error::Validation(format!("speaker id must be a positive integer: {speaker}"))
        })?;
        if speaker_id == 0 {
            return Err(Error::Validation("speaker id must be positive".into()).into());
        }
        roles.insert(speaker_id, role.parse()?);
    }
    state.orchestrator.put_speaker_roles(user.id, id, &roles)?;
    Ok(Json(serde_json::json!({ "updated": roles.len() })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PUT /v1/sessions/:id/segment-roles
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SegmentRolesBody {
    /// segment id → "coach" | "client".
    pub roles: HashMap<Uuid, String>,
}

pub async fn put_segment_roles(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<SegmentRolesBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut roles: HashMap<Uuid, SpeakerRole> = HashMap::new();
    for (segment_id, role) in &body.roles {
        roles.insert(*segment_id, role.parse()?);
    }
    state.orchestrator.put_segment_roles(user.id, id, &roles)?;
    Ok(Json(serde_json::json!({ "updated": roles.len() })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/transcript
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct UploadTranscriptBody {
    pub filename: String,
    pub content: String,
}

pub async fn upload_transcript(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UploadTranscriptBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let session =
        state
            .orchestrator
            .upload_transcript(user.id, id, &body.filename, &body.content)?;
    Ok(Json(serde_json::json!({
        "session_id": session.id,
        "status": session.status,
        "segments_count": session.segments_count,
        "duration_seconds": session.duration_seconds,
    })))
}
