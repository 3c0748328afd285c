//! Provider readiness listing.

use axum::extract::State;
use axum::response::Json;

use crate::state::AppState;

/// GET /v1/providers — configured back ends and the `auto` default.
pub async fn list_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let available: Vec<&'static str> = state
        .stt
        .available()
        .into_iter()
        .map(|v| v.as_str())
        .collect();
    let errors: Vec<serde_json::Value> = state
        .stt
        .init_errors()
        .iter()
        .map(|(vendor, error)| {
            serde_json::json!({ "provider": vendor.as_str(), "error": error })
        })
        .collect();

    Json(serde_json::json!({
        "available": available,
        "default": state.config.stt.default_vendor,
        "init_errors": errors,
    }))
}
