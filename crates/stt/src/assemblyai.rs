//! AssemblyAI adapter.
//!
//! Creates a transcript job, polls until done, and reads `utterances`
//! (per-span speaker label and confidence). Auth is the API key in the
//! `authorization` header. AssemblyAI supports language detection, so
//! `language = "auto"` passes through as `language_detection = true`.
//! Utterance timings are in milliseconds; speaker labels ("A", "B", …)
//! are remapped to dense 1-based ids in order of first appearance.

use serde_json::Value;

use cs_domain::config::SttConfig;
use cs_domain::error::{Error, Result};
use cs_domain::session::SttVendor;

use crate::traits::{
    mean_confidence, SttJobHandle, SttJobRequest, SttJobState, SttProvider, SttResult, SttSegment,
};
use crate::util::{from_reqwest, json_or_error, resolve_api_key};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// STT adapter for the AssemblyAI transcript API.
pub struct AssemblyAiProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AssemblyAiProvider {
    /// Create the adapter from the STT config section. The API key env var
    /// is read eagerly at this point.
    pub fn from_config(cfg: &SttConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.assemblyai.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.call_timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: cfg.assemblyai.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn transcript_url(&self) -> String {
        format!("{}/v2/transcript", self.base_url)
    }

    fn transcript_id_url(&self, id: &str) -> String {
        format!("{}/v2/transcript/{}", self.base_url, id)
    }

    fn build_body(&self, req: &SttJobRequest) -> Value {
        let mut body = serde_json::json!({
            "audio_url": req.audio_uri,
            "speaker_labels": true,
        });
        if req.language == "auto" {
            body["language_detection"] = serde_json::json!(true);
        } else {
            body["language_code"] = serde_json::json!(normalize_language(&req.language));
        }
        if let Some(hint) = req.speaker_hint {
            body["speakers_expected"] = serde_json::json!(hint);
        }
        body
    }

    async fn get_transcript(&self, handle: &SttJobHandle) -> Result<Value> {
        let resp = self
            .client
            .get(self.transcript_id_url(&handle.job_id))
            .header("authorization", &self.api_key)
            .send()
            .await
            .map_err(from_reqwest)?;
        json_or_error("assemblyai", resp).await
    }
}

#[async_trait::async_trait]
impl SttProvider for AssemblyAiProvider {
    async fn start_job(&self, req: &SttJobRequest) -> Result<SttJobHandle> {
        let resp = self
            .client
            .post(self.transcript_url())
            .header("authorization", &self.api_key)
            .json(&self.build_body(req))
            .send()
            .await
            .map_err(from_reqwest)?;
        let body = json_or_error("assemblyai", resp).await?;

        let id = body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Provider {
                provider: "assemblyai".into(),
                message: "transcript response missing id".into(),
            })?;

        tracing::debug!(transcript_id = %id, "assemblyai transcript job created");
        Ok(SttJobHandle {
            vendor: SttVendor::Assemblyai,
            job_id: id.to_string(),
        })
    }

    async fn poll_job(&self, handle: &SttJobHandle) -> Result<SttJobState> {
        let body = self.get_transcript(handle).await?;
        Ok(parse_transcript_state(&body))
    }

    async fn fetch_result(&self, handle: &SttJobHandle) -> Result<SttResult> {
        let body = self.get_transcript(handle).await?;
        parse_transcript_result(&body)
    }

    /// AssemblyAI has no cancel verb; deleting the transcript stops our
    /// interest in it and removes the result upstream. Best effort.
    async fn cancel_job(&self, handle: &SttJobHandle) -> Result<()> {
        let resp = self
            .client
            .delete(self.transcript_id_url(&handle.job_id))
            .header("authorization", &self.api_key)
            .send()
            .await
            .map_err(from_reqwest)?;
        json_or_error("assemblyai", resp).await.map(|_| ())
    }

    fn vendor(&self) -> SttVendor {
        SttVendor::Assemblyai
    }

    fn supports_language_detection(&self) -> bool {
        true
    }
}

/// Map our BCP-47 tags onto AssemblyAI's shorter codes.
fn normalize_language(tag: &str) -> String {
    match tag {
        "en-US" | "en-GB" | "en-AU" => "en".into(),
        "cmn-Hant-TW" | "cmn-Hans-CN" => "zh".into(),
        "ja-JP" => "ja".into(),
        "ko-KR" => "ko".into(),
        "th-TH" => "th".into(),
        "vi-VN" => "vi".into(),
        "ms-MY" => "ms".into(),
        "id-ID" => "id".into(),
        other => other.to_ascii_lowercase(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_transcript_state(body: &Value) -> SttJobState {
    match body.get("status").and_then(Value::as_str) {
        Some("completed") => SttJobState::Completed,
        Some("error") => SttJobState::Failed {
            message: body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("transcription failed")
                .to_string(),
        },
        // "queued" | "processing" — AssemblyAI reports no percentage.
        _ => SttJobState::InProgress { progress: None },
    }
}

fn parse_transcript_result(body: &Value) -> Result<SttResult> {
    if let SttJobState::Failed { message } = parse_transcript_state(body) {
        return Err(Error::Provider {
            provider: "assemblyai".into(),
            message,
        });
    }

    let utterances = body
        .get("utterances")
        .and_then(Value::as_array)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::Provider {
            provider: "assemblyai".into(),
            message: "transcript carries no utterances".into(),
        })?;

    let mut speaker_ids: std::collections::HashMap<String, u32> = std::collections::HashMap::new();
    let mut segments = Vec::with_capacity(utterances.len());
    for u in utterances {
        let (Some(start_ms), Some(end_ms), Some(text)) = (
            u.get("start").and_then(Value::as_u64),
            u.get("end").and_then(Value::as_u64),
            u.get("text").and_then(Value::as_str),
        ) else {
            continue;
        };
        let label = u
            .get("speaker")
            .and_then(Value::as_str)
            .unwrap_or("A")
            .to_string();
        let next_id = speaker_ids.len() as u32 + 1;
        let speaker_id = *speaker_ids.entry(label).or_insert(next_id);

        segments.push(SttSegment {
            speaker_id,
            start_seconds: start_ms as f64 / 1000.0,
            end_seconds: end_ms as f64 / 1000.0,
            content: text.to_string(),
            confidence: u.get("confidence").and_then(Value::as_f64),
        });
    }

    if segments.is_empty() {
        return Err(Error::Provider {
            provider: "assemblyai".into(),
            message: "utterances produced no segments".into(),
        });
    }

    let audio_duration_seconds = body
        .get("audio_duration")
        .and_then(Value::as_u64)
        .map(|d| d as u32)
        .unwrap_or_else(|| {
            segments
                .last()
                .map(|s| s.end_seconds.ceil() as u32)
                .unwrap_or(0)
        });
    let speaker_count = speaker_ids.len() as u32;
    let mean = mean_confidence(&segments);

    Ok(SttResult {
        segments,
        audio_duration_seconds,
        speaker_count,
        mean_confidence: mean,
        provider_transcript_id: body
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string),
        metadata: serde_json::json!({
            "language_code": body.get("language_code").cloned().unwrap_or(Value::Null),
        }),
    })
}
