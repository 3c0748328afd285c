//! Workbook export.
//!
//! One worksheet, one row per segment: start time, speaker label, content.
//! Labels here are the English {"Coach", "Client"} pair; the localised
//! pair is reserved for the subtitle/text formats.

use rust_xlsxwriter::{Format, Workbook};

use cs_domain::error::{Error, Result};
use cs_domain::transcript::TranscriptSegment;

use crate::roles::RoleOverlay;
use crate::timestamp;

pub fn render_workbook(
    segments: &[TranscriptSegment],
    overlay: &RoleOverlay,
) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet
        .set_name("Transcript")
        .map_err(|e| Error::Other(format!("workbook: {e}")))?;

    let header = Format::new().set_bold();
    let columns = ["Time", "Speaker", "Content"];
    for (col, title) in columns.iter().enumerate() {
        sheet
            .write_with_format(0, col as u16, *title, &header)
            .map_err(|e| Error::Other(format!("workbook: {e}")))?;
    }

    for (i, seg) in segments.iter().enumerate() {
        let row = (i + 1) as u32;
        let time = timestamp::format_vtt(seg.start_seconds);
        sheet
            .write(row, 0, time.as_str())
            .and_then(|s| s.write(row, 1, overlay.en_label(seg)))
            .and_then(|s| s.write(row, 2, seg.content.as_str()))
            .map_err(|e| Error::Other(format!("workbook: {e}")))?;
    }

    // Readable default widths; content column dominates.
    let _ = sheet.set_column_width(0, 14);
    let _ = sheet.set_column_width(1, 12);
    let _ = sheet.set_column_width(2, 80);

    workbook
        .save_to_buffer()
        .map_err(|e| Error::Other(format!("workbook: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cs_domain::transcript::SpeakerRole;
    use uuid::Uuid;

    #[test]
    fn workbook_renders_non_empty_xlsx() {
        let session_id = Uuid::new_v4();
        let segments = vec![
            TranscriptSegment::new(session_id, 1, 0.0, 2.0, "hello".into(), Some(0.9)),
            TranscriptSegment::new(session_id, 2, 2.0, 4.0, "hi".into(), Some(0.8)),
        ];
        let mut overlay = RoleOverlay::default();
        overlay.session_roles.insert(1, SpeakerRole::Coach);

        let bytes = render_workbook(&segments, &overlay).unwrap();
        // XLSX is a zip container; check the magic header.
        assert!(bytes.len() > 4);
        assert_eq!(&bytes[..2], b"PK");
    }
}
