//! HTTP surface.
//!
//! A thin translation layer: handlers parse input, call the orchestrator,
//! and map the domain error code to an HTTP status. Error bodies carry the
//! stable code plus a human-readable message:
//! `{"error": {"code": "QUOTA_EXCEEDED", "message": "..."}}`.

pub mod auth;
pub mod exports;
pub mod providers;
pub mod sessions;
pub mod transcription;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};

use cs_domain::error::Error;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wrapper that renders a domain [`Error`] as an HTTP response.
pub struct ApiError(pub Error);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = match code {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "STATE_CONFLICT" | "AUDIO_MISSING" | "TRANSCRIPT_UNAVAILABLE" => {
                StatusCode::CONFLICT
            }
            "FILE_TOO_LARGE" => StatusCode::PAYLOAD_TOO_LARGE,
            "QUOTA_EXCEEDED" => StatusCode::FORBIDDEN,
            "LANG_NOT_SUPPORTED" => StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_FORMAT" | "VALIDATION" => StatusCode::BAD_REQUEST,
            "UPSTREAM_FAILED" | "WORKER_LOST" => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(code, error = %self.0, "request failed");
        }
        (
            status,
            Json(serde_json::json!({
                "error": { "code": code, "message": self.0.to_string() }
            })),
        )
            .into_response()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the full API router. Everything except the health probe sits
/// behind the bearer-token middleware.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health));

    let protected = Router::new()
        // Sessions
        .route("/v1/sessions", post(sessions::create_session))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:id", get(sessions::get_session))
        .route("/v1/sessions/:id/upload-url", post(sessions::upload_url))
        .route(
            "/v1/sessions/:id/confirm-upload",
            post(sessions::confirm_upload),
        )
        .route("/v1/sessions/:id/status", get(sessions::get_status))
        // Transcription lifecycle
        .route("/v1/sessions/:id/start", post(transcription::start))
        .route("/v1/sessions/:id/retry", post(transcription::retry))
        .route("/v1/sessions/:id/cancel", post(transcription::cancel))
        // Transcript projection & role overlay
        .route("/v1/sessions/:id/export", get(exports::export_transcript))
        .route(
            "/v1/sessions/:id/speaker-roles",
            put(exports::put_speaker_roles),
        )
        .route(
            "/v1/sessions/:id/segment-roles",
            put(exports::put_segment_roles),
        )
        .route(
            "/v1/sessions/:id/transcript",
            post(exports::upload_transcript),
        )
        // Providers
        .route("/v1/providers", get(providers::list_providers))
        .layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}
