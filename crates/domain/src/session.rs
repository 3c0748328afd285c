//! Session aggregate and its transition rules.
//!
//! A [`Session`] is one audio recording and its derived transcript. The
//! status machine is:
//!
//! ```text
//! UPLOADING → PENDING → PROCESSING → COMPLETED | FAILED
//! FAILED → PENDING (user retry)
//! UPLOADING / PENDING → CANCELLED
//! ```
//!
//! COMPLETED and CANCELLED are terminal for the current run. Each `mark_*`
//! method checks its guard and returns `STATE_CONFLICT` when the transition
//! is illegal; concurrent writers are serialised by the store's
//! compare-and-set on `(id, status)`, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for the audio object to land in blob storage.
    Uploading,
    /// Audio present; transcription not yet dispatched.
    Pending,
    /// A worker run is in flight.
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// Terminal for the current progression. FAILED is *not* terminal —
    /// a user-initiated retry returns it to PENDING.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uploading" => Ok(Self::Uploading),
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::Validation(format!("unknown status: {other}"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the user asked for at session creation. `Auto` is resolved to a
/// concrete [`SttVendor`] at dispatch time and the resolution is recorded on
/// the session so retries are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttSelector {
    #[default]
    Auto,
    Google,
    Assemblyai,
}

/// A concrete STT back end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SttVendor {
    Google,
    Assemblyai,
}

impl SttVendor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Assemblyai => "assemblyai",
        }
    }
}

impl std::fmt::Display for SttVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SttVendor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "google" => Ok(Self::Google),
            "assemblyai" => Ok(Self::Assemblyai),
            other => Err(Error::Validation(format!("unknown STT vendor: {other}"))),
        }
    }
}

/// Language tags accepted at session creation. `auto` defers detection to
/// the provider (only AssemblyAI supports it).
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "auto",
    "en-US",
    "en-GB",
    "en-AU",
    "cmn-Hant-TW",
    "cmn-Hans-CN",
    "ja-JP",
    "ko-KR",
    "th-TH",
    "vi-VN",
    "ms-MY",
    "id-ID",
];

pub fn validate_language(language: &str) -> Result<()> {
    if SUPPORTED_LANGUAGES.contains(&language) {
        Ok(())
    } else {
        Err(Error::Validation(format!("unsupported language: {language}")))
    }
}

pub fn validate_title(title: &str) -> Result<()> {
    if title.trim().is_empty() {
        return Err(Error::Validation("session title cannot be empty".into()));
    }
    if title.chars().count() > 255 {
        return Err(Error::Validation(
            "session title cannot exceed 255 characters".into(),
        ));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregate root: one unit of transcription work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub language: String,
    /// What the user asked for (may be `auto`).
    pub provider_preference: SttSelector,
    /// Concrete vendor recorded at first dispatch; sticky across retries.
    #[serde(default)]
    pub resolved_vendor: Option<SttVendor>,

    pub status: SessionStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub progress_percentage: u8,

    // Audio object
    #[serde(default)]
    pub audio_filename: Option<String>,
    #[serde(default)]
    pub audio_blob_path: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,

    // Provider bookkeeping
    #[serde(default)]
    pub transcription_job_id: Option<String>,
    /// Provider-native transcript id (AssemblyAI transcript id or Google
    /// operation name), kept for diagnosis.
    #[serde(default)]
    pub provider_transcript_id: Option<String>,

    // Completion snapshots
    #[serde(default)]
    pub speaker_count: Option<u32>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub segments_count: u32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub transcription_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transcription_completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(user_id: Uuid, title: String, language: String, provider: SttSelector) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            title,
            language,
            provider_preference: provider,
            resolved_vendor: None,
            status: SessionStatus::Uploading,
            error_message: None,
            progress_percentage: 0,
            audio_filename: None,
            audio_blob_path: None,
            duration_seconds: None,
            transcription_job_id: None,
            provider_transcript_id: None,
            speaker_count: None,
            confidence_score: None,
            segments_count: 0,
            created_at: now,
            updated_at: now,
            transcription_started_at: None,
            transcription_completed_at: None,
        }
    }

    // ── Guards ───────────────────────────────────────────────────────

    pub fn can_upload_audio(&self) -> bool {
        matches!(self.status, SessionStatus::Uploading | SessionStatus::Failed)
    }

    pub fn can_start_transcription(&self) -> bool {
        self.status == SessionStatus::Pending
            && self.audio_blob_path.is_some()
            && self.audio_filename.is_some()
    }

    pub fn can_retry_transcription(&self) -> bool {
        self.status == SessionStatus::Failed
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self.status, SessionStatus::Uploading | SessionStatus::Pending)
    }

    pub fn is_transcript_available(&self) -> bool {
        self.status == SessionStatus::Completed && self.segments_count > 0
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Accept a fresh upload request. A FAILED session drops its previous
    /// audio object and returns to UPLOADING; the new filename is recorded
    /// so the later confirm can derive the object path.
    pub fn prepare_upload(&mut self, filename: String) -> Result<()> {
        if !self.can_upload_audio() {
            return Err(Error::StateConflict(format!(
                "cannot upload audio in status {}",
                self.status
            )));
        }
        if self.status == SessionStatus::Failed {
            self.status = SessionStatus::Uploading;
            self.audio_blob_path = None;
            self.error_message = None;
            self.progress_percentage = 0;
        }
        self.audio_filename = Some(filename);
        self.touch();
        Ok(())
    }

    /// UPLOADING | FAILED → PENDING once the audio object is confirmed.
    pub fn mark_audio_uploaded(&mut self, blob_path: String, filename: String) -> Result<()> {
        if !self.can_upload_audio() {
            return Err(Error::StateConflict(format!(
                "cannot attach audio in status {}",
                self.status
            )));
        }
        self.audio_blob_path = Some(blob_path);
        self.audio_filename = Some(filename);
        self.status = SessionStatus::Pending;
        self.error_message = None;
        self.touch();
        Ok(())
    }

    /// PENDING → PROCESSING at dispatch.
    pub fn begin_processing(&mut self, job_id: String, vendor: SttVendor) -> Result<()> {
        if !self.can_start_transcription() {
            return Err(Error::StateConflict(format!(
                "cannot start transcription in status {}",
                self.status
            )));
        }
        self.status = SessionStatus::Processing;
        self.transcription_job_id = Some(job_id);
        // Sticky across retries: the first dispatch wins.
        self.resolved_vendor.get_or_insert(vendor);
        self.transcription_started_at = Some(Utc::now());
        self.progress_percentage = 0;
        self.touch();
        Ok(())
    }

    /// PROCESSING → COMPLETED with result snapshots.
    pub fn complete(
        &mut self,
        duration_seconds: u32,
        segments_count: u32,
        speaker_count: Option<u32>,
        confidence_score: Option<f64>,
    ) -> Result<()> {
        if self.status != SessionStatus::Processing {
            return Err(Error::StateConflict(format!(
                "cannot complete in status {}",
                self.status
            )));
        }
        if duration_seconds == 0 {
            return Err(Error::Validation("duration must be positive".into()));
        }
        if segments_count == 0 {
            return Err(Error::Validation("transcript cannot be empty".into()));
        }
        self.duration_seconds = Some(duration_seconds);
        self.segments_count = segments_count;
        self.speaker_count = speaker_count;
        self.confidence_score = confidence_score;
        self.status = SessionStatus::Completed;
        self.progress_percentage = 100;
        self.transcription_completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// PROCESSING → FAILED. Audio stays in place for retry.
    pub fn fail(&mut self, error_message: String) -> Result<()> {
        if self.status != SessionStatus::Processing {
            return Err(Error::StateConflict(format!(
                "cannot fail in status {}",
                self.status
            )));
        }
        if error_message.is_empty() {
            return Err(Error::Validation("error message cannot be empty".into()));
        }
        self.status = SessionStatus::Failed;
        self.error_message = Some(error_message);
        self.touch();
        Ok(())
    }

    /// UPLOADING | PENDING → CANCELLED. Never emits a usage log.
    pub fn cancel(&mut self) -> Result<()> {
        if !self.can_cancel() {
            return Err(Error::StateConflict(format!(
                "cannot cancel in status {}",
                self.status
            )));
        }
        self.status = SessionStatus::Cancelled;
        self.touch();
        Ok(())
    }

    /// PROCESSING → CANCELLED, applied by the worker once it observes a
    /// cancellation request and has attempted the upstream cancel.
    pub fn cancel_processing(&mut self) -> Result<()> {
        if self.status != SessionStatus::Processing {
            return Err(Error::StateConflict(format!(
                "cannot cancel a run in status {}",
                self.status
            )));
        }
        self.status = SessionStatus::Cancelled;
        self.touch();
        Ok(())
    }

    /// Direct-to-COMPLETED for an uploaded transcript (no provider run).
    /// Valid from any non-terminal state that is not mid-run.
    pub fn complete_from_upload(
        &mut self,
        duration_seconds: u32,
        segments_count: u32,
        speaker_count: Option<u32>,
    ) -> Result<()> {
        if self.status.is_terminal() || self.status == SessionStatus::Processing {
            return Err(Error::StateConflict(format!(
                "cannot attach a transcript in status {}",
                self.status
            )));
        }
        if duration_seconds == 0 || segments_count == 0 {
            return Err(Error::Validation(
                "uploaded transcript must carry timed, non-empty cues".into(),
            ));
        }
        self.duration_seconds = Some(duration_seconds);
        self.segments_count = segments_count;
        self.speaker_count = speaker_count;
        self.status = SessionStatus::Completed;
        self.progress_percentage = 100;
        self.error_message = None;
        self.transcription_completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// FAILED → PENDING for a user-initiated retry. Clears the run-scoped
    /// fields; the resolved vendor is kept so `auto` stays sticky.
    pub fn retry(&mut self) -> Result<()> {
        if !self.can_retry_transcription() {
            return Err(Error::StateConflict(format!(
                "cannot retry in status {}",
                self.status
            )));
        }
        self.status = SessionStatus::Pending;
        self.error_message = None;
        self.progress_percentage = 0;
        self.transcription_job_id = None;
        self.provider_transcript_id = None;
        self.touch();
        Ok(())
    }

    /// Progress within PROCESSING; monotonic non-decreasing within a run.
    /// Out-of-order updates are coalesced, not errors.
    pub fn update_progress(&mut self, percentage: u8) -> Result<()> {
        if self.status != SessionStatus::Processing {
            return Err(Error::StateConflict(format!(
                "cannot update progress in status {}",
                self.status
            )));
        }
        if percentage > 100 {
            return Err(Error::Validation(
                "progress percentage must be between 0 and 100".into(),
            ));
        }
        if percentage > self.progress_percentage {
            self.progress_percentage = percentage;
            self.touch();
        }
        Ok(())
    }

    // ── Derived values ───────────────────────────────────────────────

    /// Rough wall-clock estimate for a transcription run, in seconds.
    /// About 2.5× the audio length, 20% more for AssemblyAI, clamped to
    /// [30 s, 10 min].
    pub fn estimated_processing_seconds(&self) -> u32 {
        let duration = match self.duration_seconds {
            Some(d) if d > 0 => d,
            _ => return 60,
        };
        let mut estimate = duration as f64 * 2.5;
        if self.resolved_vendor == Some(SttVendor::Assemblyai) {
            estimate *= 1.2;
        }
        (estimate as u32).clamp(30, 600)
    }

    /// Seconds spent processing so far (or total, once completed).
    pub fn processing_elapsed_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        let started = self.transcription_started_at?;
        let end = self.transcription_completed_at.unwrap_or(now);
        Some((end - started).num_seconds())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            Uuid::new_v4(),
            "Weekly check-in".into(),
            "cmn-Hant-TW".into(),
            SttSelector::Auto,
        )
    }

    fn uploaded() -> Session {
        let mut s = session();
        s.mark_audio_uploaded("audio-uploads/u/s.mp3".into(), "s.mp3".into())
            .unwrap();
        s
    }

    #[test]
    fn happy_path_transitions() {
        let mut s = uploaded();
        assert_eq!(s.status, SessionStatus::Pending);

        s.begin_processing("job-1".into(), SttVendor::Google).unwrap();
        assert_eq!(s.status, SessionStatus::Processing);
        assert!(s.transcription_started_at.is_some());

        s.update_progress(40).unwrap();
        s.complete(300, 12, Some(2), Some(0.9)).unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.progress_percentage, 100);
        assert_eq!(s.duration_seconds, Some(300));
        assert!(s.is_transcript_available());
    }

    #[test]
    fn cannot_start_without_audio() {
        let mut s = session();
        let err = s
            .begin_processing("job".into(), SttVendor::Google)
            .unwrap_err();
        assert_eq!(err.code(), "STATE_CONFLICT");
    }

    #[test]
    fn failed_retries_back_to_pending() {
        let mut s = uploaded();
        s.begin_processing("job-1".into(), SttVendor::Assemblyai).unwrap();
        s.fail("upstream failed".into()).unwrap();
        assert_eq!(s.status, SessionStatus::Failed);

        s.retry().unwrap();
        assert_eq!(s.status, SessionStatus::Pending);
        assert_eq!(s.error_message, None);
        assert_eq!(s.transcription_job_id, None);
        // Sticky vendor survives retry.
        assert_eq!(s.resolved_vendor, Some(SttVendor::Assemblyai));
    }

    #[test]
    fn auto_resolution_is_sticky() {
        let mut s = uploaded();
        s.begin_processing("job-1".into(), SttVendor::Google).unwrap();
        s.fail("boom".into()).unwrap();
        s.retry().unwrap();
        // A second dispatch with a different vendor must not override.
        s.begin_processing("job-2".into(), SttVendor::Assemblyai).unwrap();
        assert_eq!(s.resolved_vendor, Some(SttVendor::Google));
    }

    #[test]
    fn progress_is_monotonic_and_bounded() {
        let mut s = uploaded();
        s.begin_processing("job".into(), SttVendor::Google).unwrap();
        s.update_progress(50).unwrap();
        s.update_progress(30).unwrap(); // coalesced, not an error
        assert_eq!(s.progress_percentage, 50);
        assert_eq!(s.update_progress(101).unwrap_err().code(), "VALIDATION");
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let mut s = uploaded();
        s.begin_processing("job".into(), SttVendor::Google).unwrap();
        s.complete(120, 4, Some(2), None).unwrap();

        assert_eq!(s.cancel().unwrap_err().code(), "STATE_CONFLICT");
        assert_eq!(s.retry().unwrap_err().code(), "STATE_CONFLICT");
        assert_eq!(
            s.complete(120, 4, Some(2), None).unwrap_err().code(),
            "STATE_CONFLICT"
        );
    }

    #[test]
    fn cancel_only_before_processing() {
        let mut s = uploaded();
        s.cancel().unwrap();
        assert_eq!(s.status, SessionStatus::Cancelled);

        let mut s2 = uploaded();
        s2.begin_processing("job".into(), SttVendor::Google).unwrap();
        // PROCESSING cancel goes through the cooperative path, not here.
        assert_eq!(s2.cancel().unwrap_err().code(), "STATE_CONFLICT");
    }

    #[test]
    fn worker_cancel_applies_only_while_processing() {
        let mut s = uploaded();
        s.begin_processing("job".into(), SttVendor::Google).unwrap();
        s.cancel_processing().unwrap();
        assert_eq!(s.status, SessionStatus::Cancelled);

        let mut s2 = uploaded();
        assert_eq!(s2.cancel_processing().unwrap_err().code(), "STATE_CONFLICT");
    }

    #[test]
    fn uploaded_transcript_completes_without_a_run() {
        let mut s = session();
        s.complete_from_upload(420, 8, Some(2)).unwrap();
        assert_eq!(s.status, SessionStatus::Completed);
        assert_eq!(s.progress_percentage, 100);
        assert_eq!(s.duration_seconds, Some(420));

        // Not from PROCESSING or terminal states.
        let mut busy = uploaded();
        busy.begin_processing("job".into(), SttVendor::Google).unwrap();
        assert!(busy.complete_from_upload(420, 8, None).is_err());
        assert!(s.complete_from_upload(1, 1, None).is_err());
    }

    #[test]
    fn prepare_upload_resets_failed_sessions() {
        let mut s = uploaded();
        s.begin_processing("job".into(), SttVendor::Google).unwrap();
        s.fail("bad audio".into()).unwrap();

        s.prepare_upload("take-two.wav".into()).unwrap();
        assert_eq!(s.status, SessionStatus::Uploading);
        assert_eq!(s.audio_blob_path, None);
        assert_eq!(s.error_message, None);
        assert_eq!(s.audio_filename.as_deref(), Some("take-two.wav"));

        // Mid-run sessions refuse a new upload.
        let mut busy = uploaded();
        busy.begin_processing("job".into(), SttVendor::Google).unwrap();
        assert_eq!(
            busy.prepare_upload("x.mp3".into()).unwrap_err().code(),
            "STATE_CONFLICT"
        );
    }

    #[test]
    fn failed_session_accepts_fresh_upload() {
        let mut s = uploaded();
        s.begin_processing("job".into(), SttVendor::Google).unwrap();
        s.fail("bad audio".into()).unwrap();

        s.mark_audio_uploaded("audio-uploads/u/s2.wav".into(), "s2.wav".into())
            .unwrap();
        assert_eq!(s.status, SessionStatus::Pending);
        assert_eq!(s.error_message, None);
    }

    #[test]
    fn completion_requires_segments_and_duration() {
        let mut s = uploaded();
        s.begin_processing("job".into(), SttVendor::Google).unwrap();
        assert_eq!(
            s.complete(0, 3, None, None).unwrap_err().code(),
            "VALIDATION"
        );
        assert_eq!(
            s.complete(300, 0, None, None).unwrap_err().code(),
            "VALIDATION"
        );
    }

    #[test]
    fn estimate_clamps_and_weights_vendor() {
        let mut s = uploaded();
        assert_eq!(s.estimated_processing_seconds(), 60); // no duration yet

        s.duration_seconds = Some(300);
        assert_eq!(s.estimated_processing_seconds(), 600); // 2.5×300, capped

        s.duration_seconds = Some(4);
        assert_eq!(s.estimated_processing_seconds(), 30); // floor

        s.duration_seconds = Some(100);
        s.resolved_vendor = Some(SttVendor::Assemblyai);
        assert_eq!(s.estimated_processing_seconds(), 300); // 2.5×1.2×100
    }

    #[test]
    fn language_and_title_validation() {
        assert!(validate_language("auto").is_ok());
        assert!(validate_language("ja-JP").is_ok());
        assert!(validate_language("xx-XX").is_err());

        assert!(validate_title("ok").is_ok());
        assert!(validate_title("   ").is_err());
        assert!(validate_title(&"x".repeat(256)).is_err());
    }
}
