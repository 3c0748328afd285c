//! Usage accounting records.
//!
//! A [`UsageLog`] is appended exactly once per completed run; the owner's
//! monthly counters advance in the same unit of work (see `cs-billing`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SttVendor;

/// Billing classification of a transcription run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionType {
    /// First successful run for a session.
    Original,
    /// A run that ended in FAILED. Never billable.
    RetryFailed,
    /// A successful run after a failure or re-transcription. Billable.
    RetrySuccess,
    /// Export-related processing.
    Export,
    /// Transcript uploaded directly (VTT/SRT), no provider run.
    Manual,
}

impl TranscriptionType {
    /// Only these kinds advance the owner's monthly `usage_minutes`.
    pub fn counts_toward_monthly_minutes(self) -> bool {
        matches!(self, Self::Original | Self::RetrySuccess)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::RetryFailed => "retry_failed",
            Self::RetrySuccess => "retry_success",
            Self::Export => "export",
            Self::Manual => "manual",
        }
    }
}

/// Immutable usage ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub transcription_type: TranscriptionType,

    /// Ceiling of `duration_seconds / 60`, minimum 1 when the run had any
    /// audio at all.
    pub duration_minutes: u32,
    pub duration_seconds: u32,

    pub billable: bool,
    pub cost_cents: u32,
    pub currency: String,
    #[serde(default)]
    pub billing_reason: Option<String>,

    #[serde(default)]
    pub provider: Option<SttVendor>,

    // Quality snapshots
    #[serde(default)]
    pub word_count: Option<u32>,
    #[serde(default)]
    pub character_count: Option<u32>,
    #[serde(default)]
    pub speaker_count: Option<u32>,
    #[serde(default)]
    pub confidence_score: Option<f64>,

    pub created_at: DateTime<Utc>,
}

/// Ceiling division to whole minutes, with a 1-minute floor for any
/// non-empty recording.
pub fn duration_minutes(duration_seconds: u32) -> u32 {
    if duration_seconds == 0 {
        return 0;
    }
    duration_seconds.div_ceil(60).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_rounding_is_ceiling_with_floor() {
        assert_eq!(duration_minutes(0), 0);
        assert_eq!(duration_minutes(1), 1);
        assert_eq!(duration_minutes(59), 1);
        assert_eq!(duration_minutes(60), 1);
        assert_eq!(duration_minutes(61), 2);
        assert_eq!(duration_minutes(300), 5);
    }

    #[test]
    fn only_successful_runs_count_monthly() {
        assert!(TranscriptionType::Original.counts_toward_monthly_minutes());
        assert!(TranscriptionType::RetrySuccess.counts_toward_monthly_minutes());
        assert!(!TranscriptionType::RetryFailed.counts_toward_monthly_minutes());
        assert!(!TranscriptionType::Export.counts_toward_monthly_minutes());
        assert!(!TranscriptionType::Manual.counts_toward_monthly_minutes());
    }
}
