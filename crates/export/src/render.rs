//! Export renderers for JSON, WebVTT, SRT, and plain text.
//!
//! The workbook renderer lives in [`crate::xlsx`]; everything here returns
//! UTF-8 text. Renderers are pure: same inputs, same bytes.

use cs_domain::error::{Error, Result};
use cs_domain::session::Session;
use cs_domain::transcript::TranscriptSegment;

use crate::roles::RoleOverlay;
use crate::timestamp;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Format selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Vtt,
    Srt,
    Txt,
    Xlsx,
}

impl ExportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Vtt => "vtt",
            Self::Srt => "srt",
            Self::Txt => "txt",
            Self::Xlsx => "xlsx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Vtt => "text/vtt",
            Self::Srt => "text/srt",
            Self::Txt => "text/plain; charset=utf-8",
            Self::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "vtt" => Ok(Self::Vtt),
            "srt" => Ok(Self::Srt),
            "txt" => Ok(Self::Txt),
            "xlsx" => Ok(Self::Xlsx),
            other => Err(Error::InvalidFormat(format!(
                "unsupported export format: {other}"
            ))),
        }
    }
}

/// A rendered export ready to hand to the transport layer.
#[derive(Debug)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub filename: String,
}

/// Render the transcript in the requested format.
pub fn render(
    format: ExportFormat,
    session: &Session,
    segments: &[TranscriptSegment],
    overlay: &RoleOverlay,
) -> Result<Rendered> {
    let bytes = match format {
        ExportFormat::Json => render_json(session, segments, overlay)?.into_bytes(),
        ExportFormat::Vtt => render_vtt(session, segments, overlay).into_bytes(),
        ExportFormat::Srt => render_srt(segments, overlay).into_bytes(),
        ExportFormat::Txt => render_txt(session, segments, overlay).into_bytes(),
        ExportFormat::Xlsx => crate::xlsx::render_workbook(segments, overlay)?,
    };
    Ok(Rendered {
        bytes,
        content_type: format.content_type(),
        filename: format!("{}.{}", sanitize_filename(&session.title), format.as_str()),
    })
}

fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "transcript".to_string()
    } else {
        trimmed.to_string()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All fields plus both role maps and the resolved per-segment role.
fn render_json(
    session: &Session,
    segments: &[TranscriptSegment],
    overlay: &RoleOverlay,
) -> Result<String> {
    let role_assignments: serde_json::Map<String, serde_json::Value> = overlay
        .session_roles
        .iter()
        .map(|(speaker, role)| (speaker.to_string(), role.as_str().into()))
        .collect();
    let segment_roles: serde_json::Map<String, serde_json::Value> = overlay
        .segment_roles
        .iter()
        .map(|(id, role)| (id.to_string(), role.as_str().into()))
        .collect();

    let data = serde_json::json!({
        "session_id": session.id,
        "title": session.title,
        "language": session.language,
        "duration_seconds": session.duration_seconds,
        "created_at": session.created_at.to_rfc3339(),
        "role_assignments": role_assignments,
        "segment_roles": segment_roles,
        "segments": segments.iter().map(|seg| {
            serde_json::json!({
                "id": seg.id,
                "speaker_id": seg.speaker_id,
                "start_sec": seg.start_seconds,
                "end_sec": seg.end_seconds,
                "content": seg.content,
                "confidence": seg.confidence,
                "role": overlay
                    .effective_role(seg)
                    .map(|r| r.as_str())
                    .unwrap_or("unknown"),
            })
        }).collect::<Vec<_>>(),
    });
    serde_json::to_string_pretty(&data).map_err(Error::Json)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebVTT / SRT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn render_vtt(
    session: &Session,
    segments: &[TranscriptSegment],
    overlay: &RoleOverlay,
) -> String {
    let mut lines = vec![
        "WEBVTT".to_string(),
        format!("NOTE {}", session.title),
        String::new(),
    ];
    for seg in segments {
        lines.push(format!(
            "{} --> {}",
            timestamp::format_vtt(seg.start_seconds),
            timestamp::format_vtt(seg.end_seconds)
        ));
        lines.push(format!("<v {}>{}", overlay.zh_label(seg), seg.content));
        lines.push(String::new());
    }
    lines.join("\n")
}

fn render_srt(segments: &[TranscriptSegment], overlay: &RoleOverlay) -> String {
    let mut lines = Vec::with_capacity(segments.len() * 4);
    for (i, seg) in segments.iter().enumerate() {
        lines.push((i + 1).to_string());
        lines.push(format!(
            "{} --> {}",
            timestamp::format_srt(seg.start_seconds),
            timestamp::format_srt(seg.end_seconds)
        ));
        lines.push(format!("{}: {}", overlay.zh_label(seg), seg.content));
        lines.push(String::new());
    }
    lines.join("\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plain text
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Consecutive segments with the same effective label are grouped under a
/// single role header.
fn render_txt(
    session: &Session,
    segments: &[TranscriptSegment],
    overlay: &RoleOverlay,
) -> String {
    let mut lines = vec![format!("Transcript: {}", session.title), String::new()];
    let mut current_label: Option<String> = None;

    for seg in segments {
        let label = overlay.zh_label(seg);
        if current_label.as_deref() != Some(&label) {
            if current_label.is_some() {
                lines.push(String::new());
            }
            lines.push(format!("{label}:"));
            current_label = Some(label);
        }
        lines.push(seg.content.clone());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_domain::session::SttSelector;
    use cs_domain::transcript::SpeakerRole;
    use uuid::Uuid;

    fn session() -> Session {
        Session::new(
            Uuid::new_v4(),
            "Session 12".into(),
            "cmn-Hant-TW".into(),
            SttSelector::Auto,
        )
    }

    fn seg(session_id: Uuid, speaker: u32, start: f64, end: f64, text: &str) -> TranscriptSegment {
        TranscriptSegment::new(session_id, speaker, start, end, text.into(), Some(0.9))
    }

    fn coach_client_overlay() -> RoleOverlay {
        let mut overlay = RoleOverlay::default();
        overlay.session_roles.insert(1, SpeakerRole::Coach);
        overlay.session_roles.insert(2, SpeakerRole::Client);
        overlay
    }

    #[test]
    fn json_resolves_roles_with_segment_precedence() {
        let s = session();
        let s1 = seg(s.id, 1, 0.0, 1.0, "how was your week");
        let s2 = seg(s.id, 1, 1.5, 3.0, "let me think");

        let mut overlay = RoleOverlay::default();
        overlay.session_roles.insert(1, SpeakerRole::Coach);
        overlay.segment_roles.insert(s2.id, SpeakerRole::Client);

        let rendered = render(ExportFormat::Json, &s, &[s1.clone(), s2.clone()], &overlay).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&rendered.bytes).unwrap();

        assert_eq!(value["segments"][0]["role"], "coach");
        assert_eq!(value["segments"][1]["role"], "client");
        assert_eq!(value["role_assignments"]["1"], "coach");
        assert_eq!(value["segment_roles"][s2.id.to_string()], "client");
    }

    #[test]
    fn vtt_uses_localised_labels_and_timestamps() {
        let s = session();
        let segs = vec![
            seg(s.id, 1, 0.0, 2.5, "你好"),
            seg(s.id, 2, 3.0, 4.25, "老師好"),
        ];
        let rendered = render(ExportFormat::Vtt, &s, &segs, &coach_client_overlay()).unwrap();
        let text = String::from_utf8(rendered.bytes).unwrap();

        assert!(text.starts_with("WEBVTT\nNOTE Session 12\n"));
        assert!(text.contains("00:00:00.000 --> 00:00:02.500"));
        assert!(text.contains("<v 教練>你好"));
        assert!(text.contains("<v 客戶>老師好"));
        assert_eq!(rendered.content_type, "text/vtt");
    }

    #[test]
    fn srt_numbers_cues_and_uses_commas() {
        let s = session();
        let segs = vec![
            seg(s.id, 1, 0.0, 2.5, "hello"),
            seg(s.id, 2, 3.0, 4.0, "hi"),
        ];
        let rendered = render(ExportFormat::Srt, &s, &segs, &coach_client_overlay()).unwrap();
        let text = String::from_utf8(rendered.bytes).unwrap();

        assert!(text.starts_with("1\n00:00:00,000 --> 00:00:02,500\n教練: hello"));
        assert!(text.contains("\n2\n00:00:03,000 --> 00:00:04,000\n客戶: hi"));
    }

    #[test]
    fn txt_groups_consecutive_speakers() {
        let s = session();
        let segs = vec![
            seg(s.id, 1, 0.0, 1.0, "first"),
            seg(s.id, 1, 1.0, 2.0, "second"),
            seg(s.id, 2, 2.0, 3.0, "reply"),
            seg(s.id, 1, 3.0, 4.0, "back again"),
        ];
        let rendered = render(ExportFormat::Txt, &s, &segs, &coach_client_overlay()).unwrap();
        let text = String::from_utf8(rendered.bytes).unwrap();

        let expected = "Transcript: Session 12\n\n教練:\nfirst\nsecond\n\n客戶:\nreply\n\n教練:\nback again";
        assert_eq!(text, expected);
    }

    #[test]
    fn unassigned_speakers_keep_numbered_labels() {
        let s = session();
        let segs = vec![seg(s.id, 7, 0.0, 1.0, "mystery voice")];
        let rendered = render(ExportFormat::Vtt, &s, &segs, &RoleOverlay::default()).unwrap();
        let text = String::from_utf8(rendered.bytes).unwrap();
        assert!(text.contains("<v Speaker 7>mystery voice"));
    }

    #[test]
    fn format_parsing_and_filenames() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("pdf".parse::<ExportFormat>().is_err());

        let mut s = session();
        s.title = "a/b\\c".into();
        let rendered = render(ExportFormat::Txt, &s, &[], &RoleOverlay::default()).unwrap();
        assert_eq!(rendered.filename, "a_b_c.txt");
    }
}
