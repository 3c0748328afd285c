use cs_domain::error::Result;
use cs_domain::session::SttVendor;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / result types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A vendor-agnostic transcription job request.
#[derive(Debug, Clone)]
pub struct SttJobRequest {
    /// Blob URI of the uploaded audio object.
    pub audio_uri: String,
    /// Language tag, or `"auto"` to let the back end detect. Only back
    /// ends reporting [`SttProvider::supports_language_detection`] accept
    /// `auto`.
    pub language: String,
    /// Expected speaker count hint for diarization. `None` lets the
    /// back end choose.
    pub speaker_hint: Option<u32>,
}

/// Opaque reference to an in-flight vendor job.
#[derive(Debug, Clone)]
pub struct SttJobHandle {
    pub vendor: SttVendor,
    /// Vendor-native job identifier (operation name / transcript id).
    pub job_id: String,
}

/// Observed state of a vendor job.
#[derive(Debug, Clone, PartialEq)]
pub enum SttJobState {
    /// Still running. Progress is vendor-reported when available;
    /// callers estimate from elapsed time otherwise.
    InProgress { progress: Option<u8> },
    Completed,
    /// Vendor-side terminal failure (malformed audio, rejected request).
    Failed { message: String },
}

/// One normalized diarized span.
#[derive(Debug, Clone, PartialEq)]
pub struct SttSegment {
    /// 1-based speaker id, dense in order of first appearance.
    pub speaker_id: u32,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub content: String,
    /// Per-segment mean confidence when the vendor reports any.
    pub confidence: Option<f64>,
}

/// Normalized result of a completed job.
#[derive(Debug, Clone)]
pub struct SttResult {
    pub segments: Vec<SttSegment>,
    pub audio_duration_seconds: u32,
    pub speaker_count: u32,
    /// Mean of the per-segment confidences, when any are present.
    pub mean_confidence: Option<f64>,
    /// Vendor-native transcript id, kept on the session for diagnosis.
    pub provider_transcript_id: Option<String>,
    /// Raw vendor metadata worth keeping (model, language detected, …).
    pub metadata: serde_json::Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every STT adapter must implement.
///
/// Implementations translate between our normalized types and the wire
/// format of each vendor's HTTP API. Adapters are stateless; they hold a
/// configured HTTP client and credentials, nothing per-job.
#[async_trait::async_trait]
pub trait SttProvider: Send + Sync {
    /// Submit the audio for asynchronous transcription.
    async fn start_job(&self, req: &SttJobRequest) -> Result<SttJobHandle>;

    /// Poll the vendor for job state.
    async fn poll_job(&self, handle: &SttJobHandle) -> Result<SttJobState>;

    /// Fetch and normalize the finished transcript. Only valid once
    /// [`poll_job`](Self::poll_job) returned [`SttJobState::Completed`].
    async fn fetch_result(&self, handle: &SttJobHandle) -> Result<SttResult>;

    /// Best-effort upstream cancellation.
    async fn cancel_job(&self, handle: &SttJobHandle) -> Result<()>;

    fn vendor(&self) -> SttVendor;

    /// Whether `language = "auto"` may be passed through.
    fn supports_language_detection(&self) -> bool;
}

/// Mean over the segment confidences that are present.
pub(crate) fn mean_confidence(segments: &[SttSegment]) -> Option<f64> {
    let values: Vec<f64> = segments.iter().filter_map(|s| s.confidence).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
