//! Effective role resolution.
//!
//! Two overlays coexist: speaker-level assignments keyed by diarization id
//! and segment-level assignments keyed by segment id. The segment-level
//! entry wins; segments with neither fall back to a "Speaker N" label.

use std::collections::HashMap;

use uuid::Uuid;

use cs_domain::transcript::{SpeakerRole, TranscriptSegment};

/// Snapshot of both role overlays for one session.
#[derive(Debug, Clone, Default)]
pub struct RoleOverlay {
    pub session_roles: HashMap<u32, SpeakerRole>,
    pub segment_roles: HashMap<Uuid, SpeakerRole>,
}

impl RoleOverlay {
    pub fn new(
        session_roles: HashMap<u32, SpeakerRole>,
        segment_roles: HashMap<Uuid, SpeakerRole>,
    ) -> Self {
        Self {
            session_roles,
            segment_roles,
        }
    }

    /// Segment-level assignment first, then the speaker-level one.
    pub fn effective_role(&self, segment: &TranscriptSegment) -> Option<SpeakerRole> {
        self.segment_roles
            .get(&segment.id)
            .or_else(|| self.session_roles.get(&segment.speaker_id))
            .copied()
    }

    /// Localised label for subtitle/text exports: 教練/客戶, or the raw
    /// speaker number when no role is assigned.
    pub fn zh_label(&self, segment: &TranscriptSegment) -> String {
        match self.effective_role(segment) {
            Some(role) => role.zh_label().to_string(),
            None => format!("Speaker {}", segment.speaker_id),
        }
    }

    /// English label for the workbook export.
    pub fn en_label(&self, segment: &TranscriptSegment) -> String {
        match self.effective_role(segment) {
            Some(role) => role.en_label().to_string(),
            None => format!("Speaker {}", segment.speaker_id),
        }
    }
}
