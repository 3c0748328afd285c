//! VTT/SRT parsing for direct transcript upload.
//!
//! Accepts the two subtitle formats we also export. Speaker attribution
//! comes from `<v Name>` voice tags (VTT) or `Name:` prefixes (both), with
//! keyword-based role detection: names containing 客戶/學員/client map to
//! the client, 教練/老師/coach to the coach. Unattributed cues default to
//! the coach.

use std::sync::OnceLock;

use regex::Regex;

use cs_domain::error::{Error, Result};
use cs_domain::transcript::SpeakerRole;

use crate::timestamp;

/// One parsed cue, before it becomes a [`TranscriptSegment`].
///
/// [`TranscriptSegment`]: cs_domain::transcript::TranscriptSegment
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSegment {
    /// 1 for the coach, 2 for the client — upload keeps the two-party
    /// convention of the source material.
    pub speaker_id: u32,
    pub role: SpeakerRole,
    pub speaker_name: Option<String>,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub content: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebVTT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn parse_vtt(content: &str) -> Result<Vec<ParsedSegment>> {
    let lines: Vec<&str> = content.lines().collect();
    let mut segments = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if line == "WEBVTT" || line.is_empty() || line.starts_with("NOTE") {
            i += 1;
            continue;
        }
        if let Some((start, end)) = parse_timestamp_line(line) {
            if let Some(cue) = lines.get(i + 1) {
                if let Some(seg) = parse_content_line(cue.trim(), start, end) {
                    segments.push(seg);
                }
                i += 1;
            }
        }
        i += 1;
    }

    if segments.is_empty() {
        return Err(Error::InvalidFormat("no cues found in VTT content".into()));
    }
    Ok(segments)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SRT
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn parse_srt(content: &str) -> Result<Vec<ParsedSegment>> {
    let mut segments = Vec::new();

    for block in content.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
        let lines: Vec<&str> = block.lines().collect();
        if lines.len() < 3 {
            continue;
        }
        // Line 0 is the cue index; line 1 the timestamps; the rest content.
        let Some((start, end)) = parse_timestamp_line(lines[1].trim()) else {
            continue;
        };
        let text = lines[2..].join(" ");
        if let Some(seg) = parse_content_line(text.trim(), start, end) {
            segments.push(seg);
        }
    }

    if segments.is_empty() {
        return Err(Error::InvalidFormat("no cues found in SRT content".into()));
    }
    Ok(segments)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared cue parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_timestamp_line(line: &str) -> Option<(f64, f64)> {
    let (start_raw, end_raw) = line.split_once("-->")?;
    let start = timestamp::parse(start_raw.trim()).ok()?;
    let end = timestamp::parse(end_raw.trim()).ok()?;
    if end <= start {
        return None;
    }
    Some((start, end))
}

fn voice_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^<v\s+([^>]+)>\s*(.*?)(?:</v>)?$").expect("static regex"))
}

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^:：]+)[:：]\s*(.+)$").expect("static regex"))
}

fn parse_content_line(line: &str, start: f64, end: f64) -> Option<ParsedSegment> {
    if line.is_empty() {
        return None;
    }

    let (speaker_name, text) = if let Some(caps) = voice_tag_re().captures(line) {
        (
            Some(caps[1].trim().to_string()),
            caps[2].trim().to_string(),
        )
    } else if let Some(caps) = prefix_re().captures(line) {
        (
            Some(caps[1].trim().to_string()),
            caps[2].trim().to_string(),
        )
    } else {
        (None, line.to_string())
    };

    if text.is_empty() {
        return None;
    }

    let role = speaker_name
        .as_deref()
        .map(detect_role)
        .unwrap_or(SpeakerRole::Coach);
    Some(ParsedSegment {
        speaker_id: match role {
            SpeakerRole::Coach => 1,
            SpeakerRole::Client => 2,
        },
        role,
        speaker_name,
        start_seconds: start,
        end_seconds: end,
        content: text,
    })
}

fn detect_role(name: &str) -> SpeakerRole {
    let lowered = name.to_lowercase();
    if lowered.contains("client") || name.contains("客戶") || name.contains("學員") {
        SpeakerRole::Client
    } else {
        // Coach keywords and unrecognised names alike land here.
        SpeakerRole::Coach
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VTT: &str = "WEBVTT\nNOTE Session 12\n\n00:00:00.000 --> 00:00:02.500\n<v 教練>今天想談什麼\n\n00:00:03.000 --> 00:00:06.000\n<v 客戶>工作上的困擾\n\n00:00:06.500 --> 00:00:08.000\n<v Speaker 1>嗯\n";

    const SRT: &str = "1\n00:00:00,000 --> 00:00:02,500\nCoach: How are you today\n\n2\n00:00:03,000 --> 00:00:06,000\nClient: Doing well\nthanks\n\n3\n00:00:06,500 --> 00:00:07,500\njust thinking\n";

    #[test]
    fn vtt_voice_tags_drive_roles() {
        let segments = parse_vtt(VTT).unwrap();
        assert_eq!(segments.len(), 3);

        assert_eq!(segments[0].role, SpeakerRole::Coach);
        assert_eq!(segments[0].speaker_id, 1);
        assert_eq!(segments[0].content, "今天想談什麼");
        assert_eq!(segments[0].start_seconds, 0.0);
        assert_eq!(segments[0].end_seconds, 2.5);

        assert_eq!(segments[1].role, SpeakerRole::Client);
        assert_eq!(segments[1].speaker_id, 2);

        // Unrecognised name defaults to the coach.
        assert_eq!(segments[2].role, SpeakerRole::Coach);
    }

    #[test]
    fn srt_prefixes_and_multiline_content() {
        let segments = parse_srt(SRT).unwrap();
        assert_eq!(segments.len(), 3);

        assert_eq!(segments[0].role, SpeakerRole::Coach);
        assert_eq!(segments[1].role, SpeakerRole::Client);
        assert_eq!(segments[1].content, "Doing well thanks");
        // No prefix at all: whole line is content, coach by default.
        assert_eq!(segments[2].speaker_name, None);
        assert_eq!(segments[2].content, "just thinking");
    }

    #[test]
    fn invalid_cues_are_skipped_not_fatal() {
        let content = "WEBVTT\n\nnot a timestamp\nstray line\n\n00:00:01.000 --> 00:00:02.000\nCoach: ok\n";
        let segments = parse_vtt(content).unwrap();
        assert_eq!(segments.len(), 1);
    }

    #[test]
    fn inverted_timestamps_drop_the_cue() {
        let content = "WEBVTT\n\n00:00:05.000 --> 00:00:02.000\nCoach: impossible\n";
        assert!(parse_vtt(content).is_err());
    }

    #[test]
    fn empty_input_is_invalid_format() {
        assert_eq!(parse_vtt("WEBVTT\n").unwrap_err().code(), "INVALID_FORMAT");
        assert_eq!(parse_srt("").unwrap_err().code(), "INVALID_FORMAT");
    }

    #[test]
    fn export_then_parse_round_trips() {
        use crate::render::{render, ExportFormat};
        use crate::roles::RoleOverlay;
        use cs_domain::session::{Session, SttSelector};
        use cs_domain::transcript::TranscriptSegment;
        use uuid::Uuid;

        let session = Session::new(
            Uuid::new_v4(),
            "Round trip".into(),
            "cmn-Hant-TW".into(),
            SttSelector::Auto,
        );
        let segments = vec![
            TranscriptSegment::new(session.id, 1, 0.0, 2.5, "第一句".into(), None),
            TranscriptSegment::new(session.id, 2, 3.0, 5.75, "第二句".into(), None),
        ];
        let mut overlay = RoleOverlay::default();
        overlay.session_roles.insert(1, SpeakerRole::Coach);
        overlay.session_roles.insert(2, SpeakerRole::Client);

        let rendered = render(ExportFormat::Vtt, &session, &segments, &overlay).unwrap();
        let parsed = parse_vtt(&String::from_utf8(rendered.bytes).unwrap()).unwrap();

        assert_eq!(parsed.len(), segments.len());
        for (original, round_tripped) in segments.iter().zip(&parsed) {
            assert_eq!(round_tripped.speaker_id, original.speaker_id);
            assert_eq!(round_tripped.content, original.content);
            assert!((round_tripped.start_seconds - original.start_seconds).abs() < 0.001);
            assert!((round_tripped.end_seconds - original.end_seconds).abs() < 0.001);
        }
    }
}
