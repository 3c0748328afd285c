//! Transcript segments and the speaker-role overlay.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A single contiguous span of diarized speech.
///
/// Segments are written in one atomic batch on completion and ordered by
/// `start_seconds`. The segment rows are the authoritative transcript; any
/// blob-side copy is a convenience artefact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: Uuid,
    pub session_id: Uuid,
    /// 1-based diarization speaker id.
    pub speaker_id: u32,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub content: String,
    /// Mean confidence over the segment, when the provider reports one.
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl TranscriptSegment {
    pub fn new(
        session_id: Uuid,
        speaker_id: u32,
        start_seconds: f64,
        end_seconds: f64,
        content: String,
        confidence: Option<f64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            speaker_id,
            start_seconds,
            end_seconds,
            content,
            confidence,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.speaker_id == 0 {
            return Err(Error::Validation("speaker_id must be positive".into()));
        }
        if self.start_seconds < 0.0 {
            return Err(Error::Validation("start_seconds must be >= 0".into()));
        }
        if self.end_seconds <= self.start_seconds {
            return Err(Error::Validation(format!(
                "segment end {:.3} must be after start {:.3}",
                self.end_seconds, self.start_seconds
            )));
        }
        if self.content.trim().is_empty() {
            return Err(Error::Validation("segment content cannot be empty".into()));
        }
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(Error::Validation(format!(
                    "confidence {c} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// Coaching role assigned to a speaker or to an individual segment.
///
/// Overlay semantics: a segment-level assignment wins over the speaker-level
/// one; segments with neither fall back to a "Speaker N" label on export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    Coach,
    Client,
}

impl SpeakerRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coach => "coach",
            Self::Client => "client",
        }
    }

    /// Localised label used in VTT/SRT/TXT exports.
    pub fn zh_label(self) -> &'static str {
        match self {
            Self::Coach => "教練",
            Self::Client => "客戶",
        }
    }

    /// English label used in the workbook export.
    pub fn en_label(self) -> &'static str {
        match self {
            Self::Coach => "Coach",
            Self::Client => "Client",
        }
    }
}

impl std::str::FromStr for SpeakerRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "coach" => Ok(Self::Coach),
            "client" => Ok(Self::Client),
            other => Err(Error::Validation(format!("unknown speaker role: {other}"))),
        }
    }
}
