//! Usage ledger.
//!
//! Appends an immutable [`UsageLog`] and advances the owner's monthly and
//! cumulative counters in the same unit of work. A duplicate append for the
//! same `(session, kind)` — a redelivered completion, a double-submitted
//! retry — returns the existing log instead of double-billing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use cs_domain::config::BillingConfig;
use cs_domain::error::{Error, Result};
use cs_domain::session::{Session, SttVendor};
use cs_domain::usage::{duration_minutes, TranscriptionType, UsageLog};
use cs_store::ports::UsageRepo;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cost model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cost in cents for a billable run.
///
/// Base: minutes × per-vendor rate. Diarization beyond two speakers adds
/// 10% per extra speaker; a mean confidence below 0.8 adds a 20% low-quality
/// surcharge (re-runs are more likely).
pub fn cost_cents(
    config: &BillingConfig,
    vendor: Option<SttVendor>,
    minutes: u32,
    speaker_count: Option<u32>,
    mean_confidence: Option<f64>,
) -> u32 {
    let rate = match vendor {
        Some(SttVendor::Assemblyai) => config.assemblyai_rate_cents,
        // Google is the fleet default and the pricing fallback.
        _ => config.google_rate_cents,
    };
    let mut cost = f64::from(minutes) * f64::from(rate);
    if let Some(speakers) = speaker_count {
        cost *= 1.0 + 0.1 * f64::from(speakers.saturating_sub(2));
    }
    if let Some(conf) = mean_confidence {
        if conf < 0.8 {
            cost *= 1.2;
        }
    }
    cost.round() as u32
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UsageLedger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Quality snapshot attached to a completion log.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityStats {
    pub word_count: Option<u32>,
    pub character_count: Option<u32>,
}

pub struct UsageLedger {
    usage: Arc<dyn UsageRepo>,
    config: BillingConfig,
}

impl UsageLedger {
    pub fn new(usage: Arc<dyn UsageRepo>, config: BillingConfig) -> Self {
        Self { usage, config }
    }

    /// Record a successful completion. `kind` is ORIGINAL for the first
    /// successful run and RETRY_SUCCESS afterwards; both are billable and
    /// advance the owner's monthly window.
    pub fn record_completion(
        &self,
        session: &Session,
        kind: TranscriptionType,
        stats: QualityStats,
    ) -> Result<UsageLog> {
        self.record_completion_at(session, kind, stats, Utc::now())
    }

    fn record_completion_at(
        &self,
        session: &Session,
        kind: TranscriptionType,
        stats: QualityStats,
        now: DateTime<Utc>,
    ) -> Result<UsageLog> {
        debug_assert!(kind.counts_toward_monthly_minutes());
        let duration_seconds = session.duration_seconds.ok_or_else(|| {
            Error::Validation("cannot bill a session without a duration".into())
        })?;
        let minutes = duration_minutes(duration_seconds);
        let cost = cost_cents(
            &self.config,
            session.resolved_vendor,
            minutes,
            session.speaker_count,
            session.confidence_score,
        );

        let log = UsageLog {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            session_id: session.id,
            transcription_type: kind,
            duration_minutes: minutes,
            duration_seconds,
            billable: true,
            cost_cents: cost,
            currency: self.config.currency.clone(),
            billing_reason: Some("transcription_completed".into()),
            provider: session.resolved_vendor,
            word_count: stats.word_count,
            character_count: stats.character_count,
            speaker_count: session.speaker_count,
            confidence_score: session.confidence_score,
            created_at: now,
        };

        let appended = self.usage.append_with_counters(log, &mut |user| {
            if user.month_rolled_over(now) {
                user.reset_monthly_counters(now);
            }
            user.usage_minutes += minutes;
            user.transcription_count += 1;
            user.total_minutes_processed += u64::from(minutes);
            user.total_transcriptions += 1;
            user.total_cost_cents += u64::from(cost);
            Ok(())
        });
        self.idempotent(session.id, kind, appended)
    }

    /// Record a run that ended in FAILED. Never billable, never advances
    /// the monthly window; kept so the session's billing history is
    /// complete.
    pub fn record_failed_run(&self, session: &Session) -> Result<UsageLog> {
        let log = UsageLog {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            session_id: session.id,
            transcription_type: TranscriptionType::RetryFailed,
            duration_minutes: 0,
            duration_seconds: 0,
            billable: false,
            cost_cents: 0,
            currency: self.config.currency.clone(),
            billing_reason: Some("transcription_failed".into()),
            provider: session.resolved_vendor,
            word_count: None,
            character_count: None,
            speaker_count: None,
            confidence_score: None,
            created_at: Utc::now(),
        };
        let appended = self.usage.append_with_counters(log, &mut |_user| Ok(()));
        self.idempotent(session.id, TranscriptionType::RetryFailed, appended)
    }

    /// Record a transcript uploaded directly (no provider run).
    pub fn record_manual_upload(
        &self,
        session: &Session,
        stats: QualityStats,
    ) -> Result<UsageLog> {
        let duration_seconds = session.duration_seconds.unwrap_or(0);
        let log = UsageLog {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            session_id: session.id,
            transcription_type: TranscriptionType::Manual,
            duration_minutes: duration_minutes(duration_seconds),
            duration_seconds,
            billable: false,
            cost_cents: 0,
            currency: self.config.currency.clone(),
            billing_reason: Some("transcript_uploaded".into()),
            provider: None,
            word_count: stats.word_count,
            character_count: stats.character_count,
            speaker_count: session.speaker_count,
            confidence_score: None,
            created_at: Utc::now(),
        };
        let appended = self.usage.append_with_counters(log, &mut |_user| Ok(()));
        self.idempotent(session.id, TranscriptionType::Manual, appended)
    }

    /// Whether this session already has a billable success on record —
    /// decides ORIGINAL vs RETRY_SUCCESS for the next completion.
    pub fn has_original(&self, session_id: Uuid) -> Result<bool> {
        Ok(self
            .usage
            .for_session(session_id)?
            .iter()
            .any(|l| l.transcription_type == TranscriptionType::Original))
    }

    /// Map the store's duplicate rejection to the existing log, making
    /// redelivered writes a no-op for callers.
    fn idempotent(
        &self,
        session_id: Uuid,
        kind: TranscriptionType,
        appended: Result<UsageLog>,
    ) -> Result<UsageLog> {
        match appended {
            Err(Error::StateConflict(_)) => {
                tracing::debug!(
                    session = %session_id,
                    kind = kind.as_str(),
                    "duplicate usage log suppressed"
                );
                self.usage
                    .for_session(session_id)?
                    .into_iter()
                    .find(|l| l.transcription_type == kind)
                    .ok_or(Error::NotFound)
            }
            other => other,
        }
    }
}
