//! The transcription job orchestrator.
//!
//! Single owner of every Session status mutation. All transitions go
//! through the store's compare-and-set on `(session_id, status)`, so a
//! lost race surfaces as `STATE_CONFLICT` and redelivered worker writes
//! collapse into no-ops. Every other component returns typed failures and
//! leaves state untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use uuid::Uuid;

use cs_billing::{QualityStats, QuotaAction, QuotaService, UsageLedger};
use cs_domain::config::Config;
use cs_domain::error::{Error, Result};
use cs_domain::session::{
    validate_language, validate_title, Session, SessionStatus, SttSelector, SttVendor,
};
use cs_domain::transcript::{SpeakerRole, TranscriptSegment};
use cs_domain::usage::TranscriptionType;
use cs_export::{ExportFormat, RoleOverlay, Rendered};
use cs_store::blob::{BlobGateway, UploadUrl};
use cs_store::ports::{SessionRepo, UserRepo};
use cs_stt::{SttRegistry, SttResult};

use super::cancel::CancelMap;
use super::queue::{JobQueue, JobTicket};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Receipts & views
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct UploadGrant {
    pub url: String,
    pub blob_path: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UploadProbe {
    pub exists: bool,
    pub size_bytes: u64,
    /// The session is PENDING with the audio attached.
    pub ready: bool,
}

#[derive(Debug, Clone)]
pub struct StartReceipt {
    pub job_id: String,
    pub estimated_completion_minutes: u32,
    pub retry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Status flipped immediately (was UPLOADING or PENDING).
    Cancelled,
    /// The running worker has been signalled; it applies the terminal
    /// transition at its next suspension point.
    CancellationRequested,
}

#[derive(Debug, Clone)]
pub struct StatusView {
    pub status: SessionStatus,
    pub progress: u8,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
    /// Audio seconds transcribed per wall-clock second, once completed.
    pub processing_speed: Option<f64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Estimation helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Audio length guess before transcription: compressed speech runs about
/// one megabyte per minute. Floors at one minute.
pub fn estimate_audio_seconds(size_bytes: u64) -> u32 {
    (((size_bytes as f64 / 1_000_000.0) * 60.0) as u32).max(60)
}

/// Wall-clock estimate for a run over `audio_seconds` of audio: 2.5× the
/// audio length, 20% more on AssemblyAI, clamped to [30 s, 10 min].
pub fn estimate_run_seconds(audio_seconds: u32, vendor: SttVendor) -> u32 {
    let mut estimate = f64::from(audio_seconds) * 2.5;
    if vendor == SttVendor::Assemblyai {
        estimate *= 1.2;
    }
    (estimate as u32).clamp(30, 600)
}

/// Progress estimate while the vendor reports none:
/// `min(99, 100 × elapsed / (2.5 × audio_seconds))`.
pub fn estimate_progress(elapsed_seconds: i64, audio_seconds: u32) -> u8 {
    if elapsed_seconds <= 0 || audio_seconds == 0 {
        return 0;
    }
    let pct = 100.0 * elapsed_seconds as f64 / (2.5 * f64::from(audio_seconds));
    (pct as u8).min(99)
}

fn audio_filename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[^/\\]+\.(mp3|wav|flac|ogg|mp4|m4a)$").expect("static regex")
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    sessions: Arc<dyn SessionRepo>,
    users: Arc<dyn UserRepo>,
    quota: Arc<QuotaService>,
    ledger: Arc<UsageLedger>,
    stt: Arc<SttRegistry>,
    blobs: Arc<dyn BlobGateway>,
    queue: Arc<dyn JobQueue>,
    cancels: Arc<CancelMap>,
    config: Arc<Config>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<dyn SessionRepo>,
        users: Arc<dyn UserRepo>,
        quota: Arc<QuotaService>,
        ledger: Arc<UsageLedger>,
        stt: Arc<SttRegistry>,
        blobs: Arc<dyn BlobGateway>,
        queue: Arc<dyn JobQueue>,
        cancels: Arc<CancelMap>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            sessions,
            users,
            quota,
            ledger,
            stt,
            blobs,
            queue,
            cancels,
            config,
        }
    }

    pub fn cancel_map(&self) -> Arc<CancelMap> {
        self.cancels.clone()
    }

    // ── Session CRUD ─────────────────────────────────────────────────

    pub fn create_session(
        &self,
        owner: Uuid,
        title: &str,
        language: &str,
        provider: SttSelector,
    ) -> Result<Session> {
        validate_title(title)?;
        validate_language(language)?;
        self.quota.admit(owner, QuotaAction::CreateSession, false)?;

        let session = Session::new(owner, title.trim().to_string(), language.to_string(), provider);
        self.sessions.save(&session)?;
        tracing::info!(session = %session.id, owner = %owner, "session created");
        Ok(session)
    }

    pub fn get_session(&self, owner: Uuid, session_id: Uuid) -> Result<Session> {
        self.sessions.get(session_id, owner)
    }

    pub fn list_sessions(
        &self,
        owner: Uuid,
        status: Option<SessionStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Session>> {
        self.sessions.list(owner, status, limit.min(100), offset)
    }

    // ── Upload ───────────────────────────────────────────────────────

    /// Issue a scoped upload URL. On a FAILED session this resets the
    /// audio fields and returns the session to UPLOADING first.
    pub fn request_upload_url(
        &self,
        owner: Uuid,
        session_id: Uuid,
        filename: &str,
        size_mb: f64,
    ) -> Result<UploadGrant> {
        let session = self.sessions.get(session_id, owner)?;
        if !session.can_upload_audio() {
            return Err(Error::StateConflict(format!(
                "cannot upload audio in status {}",
                session.status
            )));
        }
        if !audio_filename_re().is_match(filename) {
            return Err(Error::Validation(format!(
                "unsupported audio filename: {filename}"
            )));
        }
        self.quota
            .admit(owner, QuotaAction::UploadFile(size_mb), false)?;

        let extension = filename.rsplit('.').next().unwrap_or("mp3");
        let blob_path = format!("audio-uploads/{owner}/{session_id}.{extension}");

        // Record the pending filename; the blob path lands on the session
        // only when ConfirmUpload sees the object.
        let expected = session.status;
        self.sessions
            .update_if_status(session_id, expected, &mut |s| {
                s.prepare_upload(filename.to_string())
            })?;

        let UploadUrl { url, expires_at } = self.blobs.generate_write_url(
            &blob_path,
            content_type_for(extension),
            Duration::seconds(self.config.storage.upload_url_ttl_secs as i64),
        )?;
        Ok(UploadGrant {
            url,
            blob_path,
            expires_at,
        })
    }

    /// Probe the audio object and attach it once present. Safe to call
    /// repeatedly; a second confirm on a PENDING session just re-reports.
    pub fn confirm_upload(&self, owner: Uuid, session_id: Uuid) -> Result<UploadProbe> {
        let session = self.sessions.get(session_id, owner)?;
        let filename = session.audio_filename.clone().ok_or_else(|| {
            Error::Validation("no upload was requested for this session".into())
        })?;
        let extension = filename.rsplit('.').next().unwrap_or("mp3");
        let blob_path = session
            .audio_blob_path
            .clone()
            .unwrap_or_else(|| format!("audio-uploads/{owner}/{session_id}.{extension}"));

        let size = match self.blobs.exists(&blob_path)? {
            Some(size) => size,
            None => {
                return Ok(UploadProbe {
                    exists: false,
                    size_bytes: 0,
                    ready: false,
                })
            }
        };

        let ready = match session.status {
            SessionStatus::Uploading => {
                self.sessions
                    .update_if_status(session_id, SessionStatus::Uploading, &mut |s| {
                        s.mark_audio_uploaded(blob_path.clone(), filename.clone())
                    })?;
                true
            }
            // A second confirm after the transition re-reports the same
            // answer without touching state.
            SessionStatus::Pending => true,
            _ => false,
        };
        Ok(UploadProbe {
            exists: true,
            size_bytes: size,
            ready,
        })
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    pub fn start_transcription(&self, owner: Uuid, session_id: Uuid) -> Result<StartReceipt> {
        let session = self.sessions.get(session_id, owner)?;
        self.dispatch(session, false)
    }

    /// FAILED → PENDING → PROCESSING. The old transcript is dropped; the
    /// provider resolution recorded on the first dispatch is kept.
    pub fn retry_transcription(&self, owner: Uuid, session_id: Uuid) -> Result<StartReceipt> {
        let session = self.sessions.get(session_id, owner)?;
        if !session.can_retry_transcription() {
            return Err(Error::StateConflict(format!(
                "cannot retry in status {}",
                session.status
            )));
        }
        let blob_path = session
            .audio_blob_path
            .clone()
            .ok_or_else(|| Error::AudioMissing("session has no audio attached".into()))?;
        if self.blobs.exists(&blob_path)?.is_none() {
            // Leave the session FAILED; the caller re-uploads first.
            return Err(Error::AudioMissing(blob_path));
        }

        let session = self
            .sessions
            .update_if_status(session_id, SessionStatus::Failed, &mut |s| s.retry())?;
        self.sessions.clear_segments(session_id)?;
        self.dispatch(session, true)
    }

    fn dispatch(&self, session: Session, retry: bool) -> Result<StartReceipt> {
        if !session.can_start_transcription() {
            return Err(Error::StateConflict(format!(
                "cannot start transcription in status {}",
                session.status
            )));
        }
        let blob_path = session
            .audio_blob_path
            .clone()
            .ok_or_else(|| Error::AudioMissing("session has no audio attached".into()))?;
        let size_bytes = self
            .blobs
            .exists(&blob_path)?
            .ok_or_else(|| Error::AudioMissing(blob_path.clone()))?;

        let estimated_audio = estimate_audio_seconds(size_bytes);
        self.quota
            .admit(session.user_id, QuotaAction::Transcribe, false)?;
        self.quota.admit(
            session.user_id,
            QuotaAction::CheckMinutes(estimated_audio.div_ceil(60)),
            true,
        )?;

        // Sticky resolution: the vendor recorded at first dispatch wins.
        let vendor = session
            .resolved_vendor
            .unwrap_or_else(|| self.stt.resolve(session.provider_preference));
        let provider = self.stt.get(vendor)?;
        if session.language == "auto" && !provider.supports_language_detection() {
            return Err(Error::LangNotSupported {
                provider: vendor.to_string(),
                language: session.language.clone(),
            });
        }

        let job_id = Uuid::new_v4().to_string();
        self.sessions
            .update_if_status(session.id, SessionStatus::Pending, &mut |s| {
                s.begin_processing(job_id.clone(), vendor)
            })?;

        self.queue.enqueue(JobTicket {
            session_id: session.id,
            vendor,
            blob_uri: self.blobs.uri(&blob_path),
            language: session.language.clone(),
            estimated_audio_seconds: estimated_audio,
        })?;

        tracing::info!(
            session = %session.id,
            vendor = %vendor,
            job_id = %job_id,
            retry,
            "transcription dispatched"
        );
        Ok(StartReceipt {
            job_id,
            estimated_completion_minutes: estimate_run_seconds(estimated_audio, vendor)
                .div_ceil(60),
            retry,
        })
    }

    // ── Cancellation ─────────────────────────────────────────────────

    pub fn cancel(&self, owner: Uuid, session_id: Uuid) -> Result<CancelOutcome> {
        let session = self.sessions.get(session_id, owner)?;
        match session.status {
            SessionStatus::Uploading | SessionStatus::Pending => {
                self.sessions
                    .update_if_status(session_id, session.status, &mut |s| s.cancel())?;
                Ok(CancelOutcome::Cancelled)
            }
            SessionStatus::Processing => {
                self.cancels.cancel(session_id);
                tracing::info!(session = %session_id, "cancellation requested for running job");
                Ok(CancelOutcome::CancellationRequested)
            }
            other => Err(Error::StateConflict(format!(
                "cannot cancel in status {other}"
            ))),
        }
    }

    // ── Worker-facing transitions ────────────────────────────────────

    /// Progress heartbeat. Events arriving after a terminal transition are
    /// dropped silently, per the state machine contract.
    pub fn report_progress(&self, session_id: Uuid, percentage: u8) -> Result<()> {
        match self
            .sessions
            .update_if_status(session_id, SessionStatus::Processing, &mut |s| {
                s.update_progress(percentage)
            }) {
            Ok(_) => Ok(()),
            Err(Error::StateConflict(_)) | Err(Error::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Record the vendor-native transcript id as soon as the upstream job
    /// exists, so a lost worker can still be diagnosed.
    pub fn record_provider_job(&self, session_id: Uuid, transcript_id: &str) -> Result<()> {
        match self
            .sessions
            .update_if_status(session_id, SessionStatus::Processing, &mut |s| {
                s.provider_transcript_id = Some(transcript_id.to_string());
                Ok(())
            }) {
            Ok(_) => Ok(()),
            Err(Error::StateConflict(_)) | Err(Error::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Apply a successful provider result: segments in one batch, then the
    /// COMPLETED transition, then the usage log — redeliveries collapse to
    /// no-ops at each step.
    pub fn complete_run(&self, session_id: Uuid, result: &SttResult) -> Result<()> {
        let session = self.sessions.get_any(session_id)?;
        match session.status {
            SessionStatus::Processing => {}
            // Duplicate delivery of an already-applied completion.
            SessionStatus::Completed => return Ok(()),
            // Cancelled or failed while the result was in flight.
            other => {
                tracing::debug!(session = %session_id, status = %other, "completion dropped");
                return Ok(());
            }
        }

        let segments: Vec<TranscriptSegment> = result
            .segments
            .iter()
            .map(|s| {
                TranscriptSegment::new(
                    session_id,
                    s.speaker_id,
                    s.start_seconds,
                    s.end_seconds,
                    s.content.clone(),
                    s.confidence,
                )
            })
            .collect();
        if segments.is_empty() {
            return Err(Error::Validation("provider returned no segments".into()));
        }
        self.sessions.save_segments(session_id, &segments)?;

        let updated = match self
            .sessions
            .update_if_status(session_id, SessionStatus::Processing, &mut |s| {
                s.provider_transcript_id = result
                    .provider_transcript_id
                    .clone()
                    .or(s.provider_transcript_id.take());
                s.complete(
                    result.audio_duration_seconds,
                    result.segments.len() as u32,
                    Some(result.speaker_count),
                    result.mean_confidence,
                )
            }) {
            Ok(s) => s,
            Err(Error::StateConflict(_)) => {
                let now = self.sessions.get_any(session_id)?;
                if now.status != SessionStatus::Completed {
                    // Cancelled/failed in the race window: drop our batch.
                    self.sessions.clear_segments(session_id)?;
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let kind = if self.ledger.has_original(session_id)? {
            TranscriptionType::RetrySuccess
        } else {
            TranscriptionType::Original
        };
        self.ledger
            .record_completion(&updated, kind, quality_stats(&segments))?;
        tracing::info!(
            session = %session_id,
            segments = segments.len(),
            kind = kind.as_str(),
            "transcription completed"
        );
        Ok(())
    }

    /// Apply a run failure. The audio stays in place for a retry; a
    /// non-billable log keeps the billing history complete.
    pub fn fail_run(&self, session_id: Uuid, message: &str) -> Result<()> {
        let updated = match self
            .sessions
            .update_if_status(session_id, SessionStatus::Processing, &mut |s| {
                s.fail(message.to_string())
            }) {
            Ok(s) => s,
            Err(Error::StateConflict(_)) | Err(Error::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };
        self.ledger.record_failed_run(&updated)?;
        tracing::warn!(session = %session_id, error = %message, "transcription failed");
        Ok(())
    }

    /// Terminal write for a cooperatively cancelled run. Never logs usage.
    pub fn cancel_run_applied(&self, session_id: Uuid) -> Result<()> {
        match self
            .sessions
            .update_if_status(session_id, SessionStatus::Processing, &mut |s| {
                s.cancel_processing()
            }) {
            Ok(_) => {
                tracing::info!(session = %session_id, "running job cancelled");
                Ok(())
            }
            Err(Error::StateConflict(_)) | Err(Error::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }

    // ── Status projection ────────────────────────────────────────────

    pub fn get_status(&self, owner: Uuid, session_id: Uuid) -> Result<StatusView> {
        let session = self.sessions.get(session_id, owner)?;
        let now = Utc::now();

        let mut progress = session.progress_percentage;
        let mut estimated_completion = None;
        if session.status == SessionStatus::Processing {
            let estimated_audio = match &session.audio_blob_path {
                Some(path) => self
                    .blobs
                    .exists(path)?
                    .map(estimate_audio_seconds)
                    .unwrap_or(60),
                None => 60,
            };
            if let Some(elapsed) = session.processing_elapsed_seconds(now) {
                progress = progress.max(estimate_progress(elapsed, estimated_audio));
            }
            let vendor = session.resolved_vendor.unwrap_or(SttVendor::Google);
            estimated_completion = session.transcription_started_at.map(|t| {
                t + Duration::seconds(i64::from(estimate_run_seconds(estimated_audio, vendor)))
            });
        }

        let processing_speed = match (session.duration_seconds, session.processing_elapsed_seconds(now))
        {
            (Some(audio), Some(elapsed))
                if session.status == SessionStatus::Completed && elapsed > 0 =>
            {
                Some(f64::from(audio) / elapsed as f64)
            }
            _ => None,
        };

        Ok(StatusView {
            status: session.status,
            progress,
            message: session.error_message.clone(),
            started_at: session.transcription_started_at,
            estimated_completion,
            processing_speed,
        })
    }

    // ── Role overlay & exports ───────────────────────────────────────

    pub fn put_speaker_roles(
        &self,
        owner: Uuid,
        session_id: Uuid,
        roles: &HashMap<u32, SpeakerRole>,
    ) -> Result<()> {
        let session = self.sessions.get(session_id, owner)?;
        if session.status != SessionStatus::Completed {
            return Err(Error::StateConflict(
                "roles can be assigned once transcription is completed".into(),
            ));
        }
        self.sessions.put_session_roles(session_id, roles)
    }

    pub fn put_segment_roles(
        &self,
        owner: Uuid,
        session_id: Uuid,
        roles: &HashMap<Uuid, SpeakerRole>,
    ) -> Result<()> {
        let session = self.sessions.get(session_id, owner)?;
        if session.status != SessionStatus::Completed {
            return Err(Error::StateConflict(
                "roles can be assigned once transcription is completed".into(),
            ));
        }
        self.sessions.put_segment_roles(session_id, roles)
    }

    pub fn export(&self, owner: Uuid, session_id: Uuid, format: ExportFormat) -> Result<Rendered> {
        let session = self.sessions.get(session_id, owner)?;
        if !session.is_transcript_available() {
            return Err(Error::TranscriptUnavailable);
        }
        let user = self.users.get(owner)?;
        if !self.quota.export_format_allowed(user.plan, format.as_str()) {
            return Err(Error::QuotaExceeded {
                used: 0,
                limit: 0,
                unit: "plan export formats",
            });
        }
        self.quota
            .admit(owner, QuotaAction::ExportTranscript, false)?;

        let segments = self.sessions.segments(session_id)?;
        let overlay = RoleOverlay::new(
            self.sessions.session_roles(session_id)?,
            self.sessions.segment_roles(session_id)?,
        );
        let rendered = cs_export::render(format, &session, &segments, &overlay)?;
        self.quota.record_export(owner)?;
        Ok(rendered)
    }

    /// Attach a transcript uploaded as a VTT/SRT file; completes the
    /// session without a provider run and logs a non-billable MANUAL entry.
    pub fn upload_transcript(
        &self,
        owner: Uuid,
        session_id: Uuid,
        filename: &str,
        content: &str,
    ) -> Result<Session> {
        let session = self.sessions.get(session_id, owner)?;

        let parsed = match filename.rsplit('.').next().map(str::to_ascii_lowercase) {
            Some(ref ext) if ext == "vtt" => cs_export::parse_vtt(content)?,
            Some(ref ext) if ext == "srt" => cs_export::parse_srt(content)?,
            _ => {
                return Err(Error::InvalidFormat(
                    "only .vtt and .srt transcripts are accepted".into(),
                ))
            }
        };

        let segments: Vec<TranscriptSegment> = parsed
            .iter()
            .map(|p| {
                TranscriptSegment::new(
                    session_id,
                    p.speaker_id,
                    p.start_seconds,
                    p.end_seconds,
                    p.content.clone(),
                    None,
                )
            })
            .collect();
        let duration = parsed
            .iter()
            .map(|p| p.end_seconds)
            .fold(0.0_f64, f64::max)
            .ceil() as u32;
        let speaker_roles: HashMap<u32, SpeakerRole> =
            parsed.iter().map(|p| (p.speaker_id, p.role)).collect();
        let speaker_count = speaker_roles.len() as u32;

        self.sessions.save_segments(session_id, &segments)?;
        let updated = match self
            .sessions
            .update_if_status(session_id, session.status, &mut |s| {
                s.complete_from_upload(duration, segments.len() as u32, Some(speaker_count))
            }) {
            Ok(s) => s,
            Err(e) => {
                self.sessions.clear_segments(session_id)?;
                return Err(e);
            }
        };
        self.sessions.put_session_roles(session_id, &speaker_roles)?;

        self.ledger
            .record_manual_upload(&updated, quality_stats(&segments))?;
        tracing::info!(
            session = %session_id,
            segments = segments.len(),
            "transcript uploaded directly"
        );
        Ok(updated)
    }
}

fn quality_stats(segments: &[TranscriptSegment]) -> QualityStats {
    QualityStats {
        word_count: Some(
            segments
                .iter()
                .map(|s| s.content.split_whitespace().count() as u32)
                .sum(),
        ),
        character_count: Some(
            segments
                .iter()
                .map(|s| s.content.chars().count() as u32)
                .sum(),
        ),
    }
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "mp4" => "audio/mp4",
        "m4a" => "audio/mp4",
        _ => "audio/mpeg",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_billing::PlanTable;
    use cs_domain::config::BillingConfig;
    use cs_domain::user::{User, UserPlan};
    use cs_store::{LocalBlobStore, MemoryStore};
    use cs_stt::{SttJobHandle, SttJobRequest, SttJobState, SttProvider, SttSegment};
    use tokio::sync::mpsc;

    struct FakeProvider {
        vendor: SttVendor,
        detects_language: bool,
    }

    #[async_trait::async_trait]
    impl SttProvider for FakeProvider {
        async fn start_job(&self, _req: &SttJobRequest) -> cs_domain::Result<SttJobHandle> {
            unimplemented!("orchestrator tests never reach the wire")
        }
        async fn poll_job(&self, _h: &SttJobHandle) -> cs_domain::Result<SttJobState> {
            unimplemented!()
        }
        async fn fetch_result(&self, _h: &SttJobHandle) -> cs_domain::Result<SttResult> {
            unimplemented!()
        }
        async fn cancel_job(&self, _h: &SttJobHandle) -> cs_domain::Result<()> {
            Ok(())
        }
        fn vendor(&self) -> SttVendor {
            self.vendor
        }
        fn supports_language_detection(&self) -> bool {
            self.detects_language
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<MemoryStore>,
        blobs: Arc<LocalBlobStore>,
        rx: mpsc::Receiver<JobTicket>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let blobs = Arc::new(LocalBlobStore::new(dir.path()).unwrap());
        let (queue, rx) = super::super::queue::MemoryJobQueue::new(16);
        let config = Arc::new(Config::default());

        let quota = Arc::new(QuotaService::new(
            store.clone(),
            PlanTable::from_overrides(&config.plans),
        ));
        let ledger = Arc::new(UsageLedger::new(store.clone(), BillingConfig::default()));
        let registry = Arc::new(SttRegistry::with_providers(
            vec![
                Arc::new(FakeProvider {
                    vendor: SttVendor::Google,
                    detects_language: false,
                }),
                Arc::new(FakeProvider {
                    vendor: SttVendor::Assemblyai,
                    detects_language: true,
                }),
            ],
            SttVendor::Google,
        ));

        let orchestrator = Orchestrator::new(
            store.clone(),
            store.clone(),
            quota,
            ledger,
            registry,
            blobs.clone(),
            Arc::new(queue),
            Arc::new(CancelMap::new()),
            config,
        );
        Harness {
            orchestrator,
            store,
            blobs,
            rx,
            _dir: dir,
        }
    }

    fn seed_user(h: &Harness, plan: UserPlan) -> User {
        let user = User::new(format!("{}@example.com", Uuid::new_v4()), plan);
        cs_store::ports::UserRepo::save(h.store.as_ref(), &user).unwrap();
        user
    }

    /// Create a session and push it to PENDING with a real blob behind it.
    fn pending_session(h: &Harness, owner: Uuid, size_bytes: usize) -> Session {
        let session = h
            .orchestrator
            .create_session(owner, "Weekly check-in", "en-US", SttSelector::Auto)
            .unwrap();
        let grant = h
            .orchestrator
            .request_upload_url(owner, session.id, "recording.mp3", 40.0)
            .unwrap();
        h.blobs.put(&grant.blob_path, &vec![0u8; size_bytes]).unwrap();
        let probe = h.orchestrator.confirm_upload(owner, session.id).unwrap();
        assert!(probe.ready);
        h.orchestrator.get_session(owner, session.id).unwrap()
    }

    fn stt_result(duration: u32) -> SttResult {
        SttResult {
            segments: vec![
                SttSegment {
                    speaker_id: 1,
                    start_seconds: 0.0,
                    end_seconds: 2.0,
                    content: "how was your week".into(),
                    confidence: Some(0.92),
                },
                SttSegment {
                    speaker_id: 2,
                    start_seconds: 2.5,
                    end_seconds: 5.0,
                    content: "pretty good".into(),
                    confidence: Some(0.88),
                },
            ],
            audio_duration_seconds: duration,
            speaker_count: 2,
            mean_confidence: Some(0.9),
            provider_transcript_id: Some("tr_1".into()),
            metadata: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn happy_path_bills_exactly_once() {
        let mut h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = pending_session(&h, user.id, 2_000_000);

        let receipt = h
            .orchestrator
            .start_transcription(user.id, session.id)
            .unwrap();
        assert!(!receipt.retry);
        assert!(receipt.estimated_completion_minutes >= 1);

        let ticket = h.rx.recv().await.unwrap();
        assert_eq!(ticket.session_id, session.id);
        assert_eq!(ticket.vendor, SttVendor::Google);

        h.orchestrator
            .complete_run(session.id, &stt_result(300))
            .unwrap();

        let done = h.orchestrator.get_session(user.id, session.id).unwrap();
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.progress_percentage, 100);
        assert_eq!(done.duration_seconds, Some(300));
        assert_eq!(done.segments_count, 2);

        let stored_user = cs_store::ports::UserRepo::get(h.store.as_ref(), user.id).unwrap();
        assert_eq!(stored_user.usage_minutes, 5);
        assert_eq!(stored_user.total_cost_cents, 15);

        // Redelivered completion is a no-op.
        h.orchestrator
            .complete_run(session.id, &stt_result(300))
            .unwrap();
        let stored_user = cs_store::ports::UserRepo::get(h.store.as_ref(), user.id).unwrap();
        assert_eq!(stored_user.usage_minutes, 5);
    }

    #[tokio::test]
    async fn quota_denial_leaves_session_pending() {
        let mut h = harness();
        let user = seed_user(&h, UserPlan::Free);
        cs_store::ports::UserRepo::update(h.store.as_ref(), user.id, &mut |u| {
            u.usage_minutes = 118;
            Ok(())
        })
        .unwrap();
        // ~10 MB ≈ 10 minutes estimated: 118 + 10 > 120.
        let session = pending_session(&h, user.id, 10_000_000);

        let err = h
            .orchestrator
            .start_transcription(user.id, session.id)
            .unwrap_err();
        assert_eq!(err.code(), "QUOTA_EXCEEDED");

        let unchanged = h.orchestrator.get_session(user.id, session.id).unwrap();
        assert_eq!(unchanged.status, SessionStatus::Pending);
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_start_loses_exactly_once() {
        let mut h = harness();
        let user = seed_user(&h, UserPlan::Pro);
        let session = pending_session(&h, user.id, 1_000_000);

        assert!(h.orchestrator.start_transcription(user.id, session.id).is_ok());
        let err = h
            .orchestrator
            .start_transcription(user.id, session.id)
            .unwrap_err();
        assert_eq!(err.code(), "STATE_CONFLICT");

        // Exactly one ticket was enqueued.
        assert!(h.rx.recv().await.is_some());
        assert!(h.rx.try_recv().is_err());
    }

    #[test]
    fn file_too_large_records_nothing() {
        let h = harness();
        let user = seed_user(&h, UserPlan::Pro);
        let session = h
            .orchestrator
            .create_session(user.id, "big one", "en-US", SttSelector::Auto)
            .unwrap();

        let err = h
            .orchestrator
            .request_upload_url(user.id, session.id, "big.mp3", 250.0)
            .unwrap_err();
        assert_eq!(err.code(), "FILE_TOO_LARGE");

        let unchanged = h.orchestrator.get_session(user.id, session.id).unwrap();
        assert_eq!(unchanged.status, SessionStatus::Uploading);
        assert_eq!(unchanged.audio_blob_path, None);
    }

    #[test]
    fn filename_validation_rejects_traversal_and_bad_types() {
        let h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = h
            .orchestrator
            .create_session(user.id, "s", "en-US", SttSelector::Auto)
            .unwrap();

        for bad in ["../evil.mp3", "a/b.mp3", "notes.txt", "noext"] {
            let err = h
                .orchestrator
                .request_upload_url(user.id, session.id, bad, 1.0)
                .unwrap_err();
            assert_eq!(err.code(), "VALIDATION", "{bad}");
        }
    }

    #[test]
    fn auto_language_requires_detection_support() {
        let h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = h
            .orchestrator
            .create_session(user.id, "s", "auto", SttSelector::Google)
            .unwrap();
        let grant = h
            .orchestrator
            .request_upload_url(user.id, session.id, "a.mp3", 1.0)
            .unwrap();
        h.blobs.put(&grant.blob_path, b"xxxx").unwrap();
        h.orchestrator.confirm_upload(user.id, session.id).unwrap();

        let err = h
            .orchestrator
            .start_transcription(user.id, session.id)
            .unwrap_err();
        assert_eq!(err.code(), "LANG_NOT_SUPPORTED");
        // Still PENDING: nothing was dispatched.
        let s = h.orchestrator.get_session(user.id, session.id).unwrap();
        assert_eq!(s.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn retry_clears_segments_and_bills_as_retry_success() {
        let mut h = harness();
        let user = seed_user(&h, UserPlan::Pro);
        let session = pending_session(&h, user.id, 1_000_000);

        h.orchestrator.start_transcription(user.id, session.id).unwrap();
        h.rx.recv().await.unwrap();
        h.orchestrator.fail_run(session.id, "upstream failed").unwrap();

        let failed = h.orchestrator.get_session(user.id, session.id).unwrap();
        assert_eq!(failed.status, SessionStatus::Failed);

        let receipt = h
            .orchestrator
            .retry_transcription(user.id, session.id)
            .unwrap();
        assert!(receipt.retry);
        h.rx.recv().await.unwrap();
        h.orchestrator
            .complete_run(session.id, &stt_result(600))
            .unwrap();

        let logs = cs_store::ports::UsageRepo::for_session(h.store.as_ref(), session.id).unwrap();
        let kinds: Vec<_> = logs.iter().map(|l| l.transcription_type).collect();
        assert!(kinds.contains(&TranscriptionType::RetryFailed));
        assert!(kinds.contains(&TranscriptionType::Original));
        // First success after a failed run is still the ORIGINAL billing.
        let original = logs
            .iter()
            .find(|l| l.transcription_type == TranscriptionType::Original)
            .unwrap();
        assert!(original.billable);
        let failed_log = logs
            .iter()
            .find(|l| l.transcription_type == TranscriptionType::RetryFailed)
            .unwrap();
        assert!(!failed_log.billable);

        let stored_user = cs_store::ports::UserRepo::get(h.store.as_ref(), user.id).unwrap();
        assert_eq!(stored_user.usage_minutes, 10);
    }

    #[tokio::test]
    async fn retranscription_of_completed_session_uses_retry_success() {
        let mut h = harness();
        let user = seed_user(&h, UserPlan::Pro);
        let session = pending_session(&h, user.id, 1_000_000);

        h.orchestrator.start_transcription(user.id, session.id).unwrap();
        h.rx.recv().await.unwrap();
        h.orchestrator.complete_run(session.id, &stt_result(300)).unwrap();

        // Operator-style re-run: back through FAILED via a forced failure
        // is not possible from COMPLETED, so simulate the second run's
        // completion delivery directly after a manual requeue.
        cs_store::ports::SessionRepo::update_if_status(
            h.store.as_ref(),
            session.id,
            SessionStatus::Completed,
            &mut |s| {
                s.status = SessionStatus::Processing;
                Ok(())
            },
        )
        .unwrap();
        h.orchestrator.complete_run(session.id, &stt_result(300)).unwrap();

        let logs = cs_store::ports::UsageRepo::for_session(h.store.as_ref(), session.id).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].transcription_type, TranscriptionType::RetrySuccess);
        assert!(logs[1].billable);
    }

    #[tokio::test]
    async fn cancel_pending_is_instant_and_free() {
        let h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = pending_session(&h, user.id, 1_000_000);

        let outcome = h.orchestrator.cancel(user.id, session.id).unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);

        let s = h.orchestrator.get_session(user.id, session.id).unwrap();
        assert_eq!(s.status, SessionStatus::Cancelled);
        assert!(cs_store::ports::UsageRepo::for_session(h.store.as_ref(), session.id)
            .unwrap()
            .is_empty());

        // Terminal: a second cancel conflicts.
        assert_eq!(
            h.orchestrator.cancel(user.id, session.id).unwrap_err().code(),
            "STATE_CONFLICT"
        );
    }

    #[tokio::test]
    async fn cancel_processing_signals_the_worker() {
        let mut h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = pending_session(&h, user.id, 1_000_000);
        h.orchestrator.start_transcription(user.id, session.id).unwrap();
        h.rx.recv().await.unwrap();

        let token = h.orchestrator.cancel_map().register(session.id);
        let outcome = h.orchestrator.cancel(user.id, session.id).unwrap();
        assert_eq!(outcome, CancelOutcome::CancellationRequested);
        assert!(token.is_cancelled());

        // The worker applies the terminal write.
        h.orchestrator.cancel_run_applied(session.id).unwrap();
        let s = h.orchestrator.get_session(user.id, session.id).unwrap();
        assert_eq!(s.status, SessionStatus::Cancelled);
        assert!(cs_store::ports::UsageRepo::for_session(h.store.as_ref(), session.id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn late_progress_is_dropped_silently() {
        let mut h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = pending_session(&h, user.id, 1_000_000);
        h.orchestrator.start_transcription(user.id, session.id).unwrap();
        h.rx.recv().await.unwrap();

        h.orchestrator.report_progress(session.id, 35).unwrap();
        h.orchestrator.complete_run(session.id, &stt_result(120)).unwrap();

        // Late heartbeat after the terminal transition: swallowed.
        h.orchestrator.report_progress(session.id, 60).unwrap();
        let s = h.orchestrator.get_session(user.id, session.id).unwrap();
        assert_eq!(s.progress_percentage, 100);
    }

    #[test]
    fn start_without_object_reports_audio_missing() {
        let h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = h
            .orchestrator
            .create_session(user.id, "s", "en-US", SttSelector::Auto)
            .unwrap();
        h.orchestrator
            .request_upload_url(user.id, session.id, "a.mp3", 1.0)
            .unwrap();
        // Never uploaded; manually force PENDING to exercise the guard.
        cs_store::ports::SessionRepo::update_if_status(
            h.store.as_ref(),
            session.id,
            SessionStatus::Uploading,
            &mut |s| s.mark_audio_uploaded(format!("audio-uploads/{}/{}.mp3", user.id, session.id), "a.mp3".into()),
        )
        .unwrap();

        let err = h
            .orchestrator
            .start_transcription(user.id, session.id)
            .unwrap_err();
        assert_eq!(err.code(), "AUDIO_MISSING");
        let s = h.orchestrator.get_session(user.id, session.id).unwrap();
        assert_eq!(s.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn second_confirm_upload_is_idempotent() {
        let h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = pending_session(&h, user.id, 1_000_000);

        let again = h.orchestrator.confirm_upload(user.id, session.id).unwrap();
        assert!(again.exists && again.ready);
        let s = h.orchestrator.get_session(user.id, session.id).unwrap();
        assert_eq!(s.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn role_precedence_flows_through_export() {
        let mut h = harness();
        let user = seed_user(&h, UserPlan::Pro);
        let session = pending_session(&h, user.id, 1_000_000);
        h.orchestrator.start_transcription(user.id, session.id).unwrap();
        h.rx.recv().await.unwrap();

        // Two segments, both speaker 1.
        let result = SttResult {
            segments: vec![
                SttSegment {
                    speaker_id: 1,
                    start_seconds: 0.0,
                    end_seconds: 2.0,
                    content: "s1".into(),
                    confidence: None,
                },
                SttSegment {
                    speaker_id: 1,
                    start_seconds: 3.0,
                    end_seconds: 4.0,
                    content: "s2".into(),
                    confidence: None,
                },
            ],
            audio_duration_seconds: 4,
            speaker_count: 1,
            mean_confidence: None,
            provider_transcript_id: None,
            metadata: serde_json::json!({}),
        };
        h.orchestrator.complete_run(session.id, &result).unwrap();

        let mut speaker_roles = HashMap::new();
        speaker_roles.insert(1, SpeakerRole::Coach);
        h.orchestrator
            .put_speaker_roles(user.id, session.id, &speaker_roles)
            .unwrap();

        let segments = cs_store::ports::SessionRepo::segments(h.store.as_ref(), session.id).unwrap();
        let mut segment_roles = HashMap::new();
        segment_roles.insert(segments[1].id, SpeakerRole::Client);
        h.orchestrator
            .put_segment_roles(user.id, session.id, &segment_roles)
            .unwrap();

        let rendered = h
            .orchestrator
            .export(user.id, session.id, ExportFormat::Json)
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&rendered.bytes).unwrap();
        assert_eq!(value["segments"][0]["role"], "coach");
        assert_eq!(value["segments"][1]["role"], "client");
    }

    #[test]
    fn roles_require_completed_session() {
        let h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = pending_session(&h, user.id, 1_000_000);

        let mut roles = HashMap::new();
        roles.insert(1, SpeakerRole::Coach);
        assert_eq!(
            h.orchestrator
                .put_speaker_roles(user.id, session.id, &roles)
                .unwrap_err()
                .code(),
            "STATE_CONFLICT"
        );
    }

    #[test]
    fn export_respects_plan_format_allowlist() {
        let h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = pending_session(&h, user.id, 1_000_000);
        // Force a completed transcript.
        cs_store::ports::SessionRepo::update_if_status(
            h.store.as_ref(),
            session.id,
            SessionStatus::Pending,
            &mut |s| {
                s.status = SessionStatus::Processing;
                Ok(())
            },
        )
        .unwrap();
        h.orchestrator
            .complete_run(session.id, &stt_result(60))
            .unwrap();

        // Free plan: json allowed, xlsx not.
        assert!(h
            .orchestrator
            .export(user.id, session.id, ExportFormat::Json)
            .is_ok());
        assert_eq!(
            h.orchestrator
                .export(user.id, session.id, ExportFormat::Xlsx)
                .unwrap_err()
                .code(),
            "QUOTA_EXCEEDED"
        );
    }

    #[test]
    fn export_before_completion_is_unavailable() {
        let h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = pending_session(&h, user.id, 1_000_000);
        assert_eq!(
            h.orchestrator
                .export(user.id, session.id, ExportFormat::Json)
                .unwrap_err()
                .code(),
            "TRANSCRIPT_UNAVAILABLE"
        );
    }

    #[test]
    fn uploaded_transcript_completes_and_logs_manual() {
        let h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let session = h
            .orchestrator
            .create_session(user.id, "typed up", "en-US", SttSelector::Auto)
            .unwrap();

        let vtt = "WEBVTT\n\n00:00:00.000 --> 00:00:02.000\nCoach: welcome back\n\n00:00:02.500 --> 00:00:04.000\nClient: thanks\n";
        let updated = h
            .orchestrator
            .upload_transcript(user.id, session.id, "notes.vtt", vtt)
            .unwrap();
        assert_eq!(updated.status, SessionStatus::Completed);
        assert_eq!(updated.duration_seconds, Some(4));

        let logs = cs_store::ports::UsageRepo::for_session(h.store.as_ref(), session.id).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].transcription_type, TranscriptionType::Manual);
        assert!(!logs[0].billable);
        // Roles derived from the cue prefixes.
        let roles = cs_store::ports::SessionRepo::session_roles(h.store.as_ref(), session.id).unwrap();
        assert_eq!(roles.get(&1), Some(&SpeakerRole::Coach));
        assert_eq!(roles.get(&2), Some(&SpeakerRole::Client));

        // Unsupported extension is rejected before any state change.
        let other = h
            .orchestrator
            .create_session(user.id, "second", "en-US", SttSelector::Auto)
            .unwrap();
        assert_eq!(
            h.orchestrator
                .upload_transcript(user.id, other.id, "notes.docx", vtt)
                .unwrap_err()
                .code(),
            "INVALID_FORMAT"
        );
    }

    #[test]
    fn ownership_is_enforced_everywhere() {
        let h = harness();
        let user = seed_user(&h, UserPlan::Free);
        let stranger = seed_user(&h, UserPlan::Free);
        let session = pending_session(&h, user.id, 1_000_000);

        assert_eq!(
            h.orchestrator
                .get_session(stranger.id, session.id)
                .unwrap_err()
                .code(),
            "NOT_FOUND"
        );
        assert_eq!(
            h.orchestrator
                .start_transcription(stranger.id, session.id)
                .unwrap_err()
                .code(),
            "NOT_FOUND"
        );
        assert_eq!(
            h.orchestrator.cancel(stranger.id, session.id).unwrap_err().code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn estimation_helpers() {
        assert_eq!(estimate_audio_seconds(0), 60);
        assert_eq!(estimate_audio_seconds(5_000_000), 300);

        assert_eq!(estimate_run_seconds(300, SttVendor::Google), 600); // capped
        assert_eq!(estimate_run_seconds(100, SttVendor::Google), 250);
        assert_eq!(estimate_run_seconds(100, SttVendor::Assemblyai), 300);
        assert_eq!(estimate_run_seconds(4, SttVendor::Google), 30); // floor

        assert_eq!(estimate_progress(0, 300), 0);
        assert_eq!(estimate_progress(375, 300), 50);
        assert_eq!(estimate_progress(10_000, 300), 99); // capped at 99
    }
}
