//! Google Speech-to-Text adapter.
//!
//! Uses the `speech:longrunningrecognize` API with speaker diarization and
//! per-word confidence. Auth is an API key passed as a query parameter
//! (`key={api_key}`). Google reports confidence per word; we aggregate to a
//! per-segment mean while grouping consecutive words by speaker tag.

use serde_json::Value;

use cs_domain::config::SttConfig;
use cs_domain::error::{Error, Result};
use cs_domain::session::SttVendor;

use crate::traits::{
    mean_confidence, SttJobHandle, SttJobRequest, SttJobState, SttProvider, SttResult, SttSegment,
};
use crate::util::{from_reqwest, json_or_error, parse_duration_secs, resolve_api_key};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// STT adapter for the Google Speech-to-Text long-running API.
pub struct GoogleSttProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GoogleSttProvider {
    /// Create the adapter from the STT config section. The API key env var
    /// is read eagerly at this point.
    pub fn from_config(cfg: &SttConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.google.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.call_timeout_secs))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: cfg.google.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    // ── Internal helpers ───────────────────────────────────────────

    fn recognize_url(&self) -> String {
        format!(
            "{}/v1/speech:longrunningrecognize?key={}",
            self.base_url, self.api_key
        )
    }

    fn operation_url(&self, name: &str) -> String {
        format!("{}/v1/operations/{}?key={}", self.base_url, name, self.api_key)
    }

    fn cancel_url(&self, name: &str) -> String {
        format!(
            "{}/v1/operations/{}:cancel?key={}",
            self.base_url, name, self.api_key
        )
    }

    fn build_body(&self, req: &SttJobRequest) -> Value {
        let max_speakers = req.speaker_hint.unwrap_or(6).max(2);
        serde_json::json!({
            "config": {
                "languageCode": req.language,
                "enableAutomaticPunctuation": true,
                "enableWordConfidence": true,
                "diarizationConfig": {
                    "enableSpeakerDiarization": true,
                    "minSpeakerCount": 2,
                    "maxSpeakerCount": max_speakers,
                },
            },
            "audio": { "uri": req.audio_uri },
        })
    }

    async fn get_operation(&self, handle: &SttJobHandle) -> Result<Value> {
        let resp = self
            .client
            .get(self.operation_url(&handle.job_id))
            .send()
            .await
            .map_err(from_reqwest)?;
        json_or_error("google", resp).await
    }
}

#[async_trait::async_trait]
impl SttProvider for GoogleSttProvider {
    async fn start_job(&self, req: &SttJobRequest) -> Result<SttJobHandle> {
        if req.language == "auto" {
            return Err(Error::LangNotSupported {
                provider: "google".into(),
                language: req.language.clone(),
            });
        }

        let resp = self
            .client
            .post(self.recognize_url())
            .json(&self.build_body(req))
            .send()
            .await
            .map_err(from_reqwest)?;
        let body = json_or_error("google", resp).await?;

        let name = body
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Provider {
                provider: "google".into(),
                message: "longrunningrecognize response missing operation name".into(),
            })?;

        tracing::debug!(operation = %name, "google recognize operation started");
        Ok(SttJobHandle {
            vendor: SttVendor::Google,
            job_id: name.to_string(),
        })
    }

    async fn poll_job(&self, handle: &SttJobHandle) -> Result<SttJobState> {
        let op = self.get_operation(handle).await?;
        Ok(parse_operation_state(&op))
    }

    async fn fetch_result(&self, handle: &SttJobHandle) -> Result<SttResult> {
        let op = self.get_operation(handle).await?;
        parse_operation_result(&op, &handle.job_id)
    }

    async fn cancel_job(&self, handle: &SttJobHandle) -> Result<()> {
        let resp = self
            .client
            .post(self.cancel_url(&handle.job_id))
            .send()
            .await
            .map_err(from_reqwest)?;
        json_or_error("google", resp).await.map(|_| ())
    }

    fn vendor(&self) -> SttVendor {
        SttVendor::Google
    }

    fn supports_language_detection(&self) -> bool {
        false
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_operation_state(op: &Value) -> SttJobState {
    if let Some(err) = op.get("error") {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("operation failed")
            .to_string();
        return SttJobState::Failed { message };
    }
    if op.get("done").and_then(Value::as_bool).unwrap_or(false) {
        return SttJobState::Completed;
    }
    let progress = op
        .pointer("/metadata/progressPercent")
        .and_then(Value::as_u64)
        .map(|p| p.min(100) as u8);
    SttJobState::InProgress { progress }
}

/// Normalize a finished operation. Google attaches the full diarized word
/// list (with `speakerTag`) to the final result entry; consecutive words
/// with the same tag become one segment.
fn parse_operation_result(op: &Value, operation_name: &str) -> Result<SttResult> {
    if let SttJobState::Failed { message } = parse_operation_state(op) {
        return Err(Error::Provider {
            provider: "google".into(),
            message,
        });
    }

    let results = op
        .pointer("/response/results")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Provider {
            provider: "google".into(),
            message: "operation response carries no results".into(),
        })?;

    // The last result's first alternative holds the diarized word list.
    let words = results
        .iter()
        .rev()
        .find_map(|r| r.pointer("/alternatives/0/words").and_then(Value::as_array))
        .filter(|w| !w.is_empty())
        .ok_or_else(|| Error::Provider {
            provider: "google".into(),
            message: "operation response carries no diarized words".into(),
        })?;

    let segments = group_words_into_segments(words);
    if segments.is_empty() {
        return Err(Error::Provider {
            provider: "google".into(),
            message: "diarized words produced no segments".into(),
        });
    }

    let audio_duration_seconds = segments
        .last()
        .map(|s| s.end_seconds.ceil() as u32)
        .unwrap_or(0);
    let speaker_count = segments
        .iter()
        .map(|s| s.speaker_id)
        .collect::<std::collections::HashSet<_>>()
        .len() as u32;
    let mean = mean_confidence(&segments);

    Ok(SttResult {
        segments,
        audio_duration_seconds,
        speaker_count,
        mean_confidence: mean,
        provider_transcript_id: Some(operation_name.to_string()),
        metadata: serde_json::json!({ "operation": operation_name }),
    })
}

struct WordSpan {
    speaker_tag: u64,
    start: f64,
    end: f64,
    word: String,
    confidence: Option<f64>,
}

fn parse_word(w: &Value) -> Option<WordSpan> {
    Some(WordSpan {
        speaker_tag: w.get("speakerTag").and_then(Value::as_u64)?,
        start: w
            .get("startTime")
            .and_then(Value::as_str)
            .and_then(parse_duration_secs)?,
        end: w
            .get("endTime")
            .and_then(Value::as_str)
            .and_then(parse_duration_secs)?,
        word: w.get("word").and_then(Value::as_str)?.to_string(),
        confidence: w.get("confidence").and_then(Value::as_f64),
    })
}

fn group_words_into_segments(words: &[Value]) -> Vec<SttSegment> {
    let mut speaker_ids: std::collections::HashMap<u64, u32> = std::collections::HashMap::new();
    let mut segments: Vec<SttSegment> = Vec::new();
    let mut current: Option<(u64, f64, f64, Vec<String>, Vec<f64>)> = None;

    for raw in words {
        let Some(span) = parse_word(raw) else { continue };

        match current.as_mut() {
            Some((tag, _, end, text, confs)) if *tag == span.speaker_tag => {
                *end = span.end;
                text.push(span.word);
                if let Some(c) = span.confidence {
                    confs.push(c);
                }
            }
            _ => {
                if let Some(done) = current.take() {
                    segments.push(finish_segment(done, &mut speaker_ids));
                }
                let confs = span.confidence.into_iter().collect();
                current = Some((span.speaker_tag, span.start, span.end, vec![span.word], confs));
            }
        }
    }
    if let Some(done) = current.take() {
        segments.push(finish_segment(done, &mut speaker_ids));
    }
    segments
}

fn finish_segment(
    (tag, start, end, text, confs): (u64, f64, f64, Vec<String>, Vec<f64>),
    speaker_ids: &mut std::collections::HashMap<u64, u32>,
) -> SttSegment {
    let next_id = speaker_ids.len() as u32 + 1;
    let speaker_id = *speaker_ids.entry(tag).or_insert(next_id);
    let confidence = if confs.is_empty() {
        None
    } else {
        Some(confs.iter().sum::<f64>() / confs.len() as f64)
    };
    SttSegment {
        speaker_id,
        start_seconds: start,
        end_seconds: end,
        content: text.join(" "),
        confidence,
    }
}
