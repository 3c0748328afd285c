//! API authentication and caller identity.
//!
//! The env var named by `config.server.api_token_env` is read **once at
//! startup** and its SHA-256 digest cached in `AppState`. When set, every
//! protected request must carry `Authorization: Bearer <token>`; when
//! unset, the server logs a warning once and runs open (dev mode).
//!
//! The acting account is identified by the `x-user-email` header and must
//! exist in the user store — full identity federation sits outside the
//! core.

use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use cs_domain::error::Error;
use cs_domain::user::User;

use super::ApiError;
use crate::state::AppState;

/// Bearer-token middleware for protected routes.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // `api_token_hash` is `None` in dev mode (no token configured).
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash to a fixed length, then compare in constant time.
    let provided_hash = Sha256::digest(provided.as_bytes());
    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": { "code": "UNAUTHORIZED", "message": "invalid or missing API token" }
            })),
        )
            .into_response();
    }

    next.run(req).await
}

/// Extractor resolving the acting user from `x-user-email`.
pub struct CurrentUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let email = parts
            .headers
            .get("x-user-email")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError(Error::Validation("missing x-user-email header".into()))
            })?;
        let user = state.users.get_by_email(email)?;
        Ok(CurrentUser(user))
    }
}
