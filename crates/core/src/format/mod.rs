//! Subtitle file codecs consumed by the translation pipeline.
//! Each format turns file bytes into a `CueSheet` and back.

use crate::cue::CueSheet;
use crate::error::FormatError;
use std::path::Path;
use std::str::FromStr;

pub mod srt;
pub mod vtt;

/// Subtitle file formats the codecs understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Srt,
    Vtt,
}

impl SubtitleFormat {
    /// Pick a format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, FormatError> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        ext.parse()
    }

    pub fn extension(self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
        }
    }
}

impl FromStr for SubtitleFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "srt" => Ok(SubtitleFormat::Srt),
            "vtt" | "webvtt" => Ok(SubtitleFormat::Vtt),
            other => Err(FormatError::Unsupported(other.to_string())),
        }
    }
}

/// Parse raw file bytes into an ordered cue sheet.
pub fn parse(bytes: &[u8], format: SubtitleFormat) -> Result<CueSheet, FormatError> {
    let text = std::str::from_utf8(bytes).map_err(|_| FormatError::Encoding)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    match format {
        SubtitleFormat::Srt => srt::parse(text),
        SubtitleFormat::Vtt => vtt::parse(text),
    }
}

/// Serialize a cue sheet back into file bytes.
pub fn serialize(sheet: &CueSheet, format: SubtitleFormat) -> Vec<u8> {
    match format {
        SubtitleFormat::Srt => srt::format(sheet).into_bytes(),
        SubtitleFormat::Vtt => vtt::format(sheet).into_bytes(),
    }
}

/// Line iterator yielding 1-based line numbers, tolerant of CRLF and a BOM.
pub(crate) struct Lines<'a> {
    inner: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> Lines<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        Self {
            inner: input.lines().enumerate(),
        }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = (usize, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(i, l)| (i + 1, l))
    }
}

/// Parse `HH:MM:SS,mmm`, `HH:MM:SS.mmm` or `MM:SS.mmm` into milliseconds.
pub(crate) fn parse_timestamp(t: &str) -> Option<u64> {
    let (clock, frac) = t.rsplit_once([',', '.'])?;
    if frac.len() != 3 {
        return None;
    }
    let ms: u64 = frac.parse().ok()?;
    let parts = clock
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        _ => return None,
    };
    if m >= 60 || s >= 60 {
        return None;
    }
    h.checked_mul(60)?
        .checked_add(m)?
        .checked_mul(60)?
        .checked_add(s)?
        .checked_mul(1000)?
        .checked_add(ms)
}

/// Format milliseconds back to `HH:MM:SS<sep>mmm`.
pub(crate) fn format_timestamp(ms: u64, sep: char) -> String {
    let h = ms / 3_600_000;
    let m = (ms % 3_600_000) / 60_000;
    let s = (ms % 60_000) / 1000;
    let ms = ms % 1000;
    format!("{h:02}:{m:02}:{s:02}{sep}{ms:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps() {
        assert_eq!(parse_timestamp("01:02:03,004"), Some(3_723_004));
        assert_eq!(parse_timestamp("02:03.004"), Some(123_004));
        assert_eq!(parse_timestamp("00:61:00,000"), None);
        assert_eq!(parse_timestamp("00:00:01,5"), None);
        assert_eq!(format_timestamp(3_723_004, ','), "01:02:03,004");
    }

    /// Hour fields too large for a millisecond count are rejected.
    #[test]
    fn huge_hours_do_not_overflow() {
        assert_eq!(parse_timestamp("99999999999999999:00:00,000"), None);
        assert_eq!(parse_timestamp("5124095576:00:00,000"), Some(5_124_095_576 * 3_600_000));
        let err = parse(
            b"1\n99999999999999999:00:00,000 --> 99999999999999999:00:01,000\nhi\n",
            SubtitleFormat::Srt,
        )
        .unwrap_err();
        assert!(matches!(err, FormatError::Syntax { line: 2, .. }));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            SubtitleFormat::from_path(Path::new("a/movie.SRT")).unwrap(),
            SubtitleFormat::Srt
        );
        assert_eq!(
            SubtitleFormat::from_path(Path::new("clip.vtt")).unwrap(),
            SubtitleFormat::Vtt
        );
        assert_eq!(
            SubtitleFormat::from_path(Path::new("show.ass")).unwrap_err(),
            FormatError::Unsupported("ass".into())
        );
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert_eq!(
            parse(&[0xff, 0xfe, 0x00], SubtitleFormat::Srt).unwrap_err(),
            FormatError::Encoding
        );
    }
}
