//! Subtitle timestamp formatting and parsing.

use cs_domain::error::{Error, Result};

/// `HH:MM:SS.mmm` (WebVTT).
pub fn format_vtt(seconds: f64) -> String {
    let (h, m, s, ms) = split(seconds);
    format!("{h:02}:{m:02}:{s:02}.{ms:03}")
}

/// `HH:MM:SS,mmm` (SRT).
pub fn format_srt(seconds: f64) -> String {
    let (h, m, s, ms) = split(seconds);
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

fn split(seconds: f64) -> (u64, u64, u64, u64) {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;
    (total_s / 3600, (total_s % 3600) / 60, total_s % 60, ms)
}

/// Parse `HH:MM:SS.mmm`, `HH:MM:SS,mmm`, or `HH:MM:SS` to seconds.
/// Millisecond digits beyond three are truncated; fewer are zero-padded.
pub fn parse(timestamp: &str) -> Result<f64> {
    let normalized = timestamp.trim().replace(',', ".");
    let parts: Vec<&str> = normalized.split(':').collect();
    if parts.len() != 3 {
        return Err(Error::InvalidFormat(format!(
            "bad timestamp: {timestamp}"
        )));
    }
    let hours: u64 = parse_int(parts[0], timestamp)?;
    let minutes: u64 = parse_int(parts[1], timestamp)?;

    let (sec_str, ms) = match parts[2].split_once('.') {
        Some((s, frac)) => {
            let mut frac = frac.to_string();
            frac.truncate(3);
            while frac.len() < 3 {
                frac.push('0');
            }
            (s, parse_int(&frac, timestamp)?)
        }
        None => (parts[2], 0),
    };
    let seconds: u64 = parse_int(sec_str, timestamp)?;

    Ok((hours * 3600 + minutes * 60 + seconds) as f64 + ms as f64 / 1000.0)
}

fn parse_int(raw: &str, original: &str) -> Result<u64> {
    raw.parse()
        .map_err(|_| Error::InvalidFormat(format!("bad timestamp: {original}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vtt_and_srt_formats() {
        assert_eq!(format_vtt(0.0), "00:00:00.000");
        assert_eq!(format_vtt(3723.456), "01:02:03.456");
        assert_eq!(format_srt(3723.456), "01:02:03,456");
        assert_eq!(format_vtt(59.9995), "00:01:00.000"); // rounds up
    }

    #[test]
    fn parse_accepts_both_separators() {
        assert_eq!(parse("01:02:03.456").unwrap(), 3723.456);
        assert_eq!(parse("01:02:03,456").unwrap(), 3723.456);
        assert_eq!(parse("00:00:07").unwrap(), 7.0);
    }

    #[test]
    fn parse_pads_and_truncates_millis() {
        assert_eq!(parse("00:00:01.5").unwrap(), 1.5);
        assert_eq!(parse("00:00:01.12345").unwrap(), 1.123);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse("12:34").is_err());
        assert!(parse("aa:bb:cc").is_err());
    }

    #[test]
    fn format_parse_round_trip() {
        for &secs in &[0.0, 1.5, 59.999, 3600.25, 7261.013] {
            let vtt = format_vtt(secs);
            assert!((parse(&vtt).unwrap() - secs).abs() < 0.001, "{vtt}");
            let srt = format_srt(secs);
            assert!((parse(&srt).unwrap() - secs).abs() < 0.001, "{srt}");
        }
    }
}
