//! Shared helpers for the STT adapters.

use cs_domain::error::{Error, Result};

/// Convert a [`reqwest::Error`] into the domain [`Error`] type.
///
/// Timeout errors map to [`Error::Timeout`]; everything else maps to
/// [`Error::Http`]. Both are transient from the worker's point of view.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Read the API key from the configured environment variable.
pub(crate) fn resolve_api_key(env_var: &str) -> Result<String> {
    match std::env::var(env_var) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::Config(format!(
            "environment variable '{env_var}' not set"
        ))),
    }
}

/// Classify a non-success response body into transient vs permanent.
///
/// 5xx and 429 are transport-level and retryable inside a run; other 4xx
/// are vendor rejections the worker must not retry.
pub(crate) async fn json_or_error(
    provider: &str,
    resp: reqwest::Response,
) -> Result<serde_json::Value> {
    let status = resp.status();
    if status.is_success() {
        return resp.json().await.map_err(from_reqwest);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = format!("{status}: {}", truncate(&body, 300));
    if status.is_server_error() || status.as_u16() == 429 {
        Err(Error::Http(message))
    } else {
        Err(Error::Provider {
            provider: provider.to_string(),
            message,
        })
    }
}

/// Parse a Google protobuf Duration string (`"12.345s"`) to seconds.
pub(crate) fn parse_duration_secs(raw: &str) -> Option<f64> {
    raw.strip_suffix('s').and_then(|v| v.parse().ok())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
