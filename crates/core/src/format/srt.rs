//! SubRip (SRT) parsing and formatting.
//! Block numbers are regenerated on output; timing and coordinates are preserved.

use super::{format_timestamp, parse_timestamp, Lines};
use crate::cue::{Cue, CueSheet};
use crate::error::FormatError;

/// Parse SRT text into a cue sheet.
/// This function should read indices, times and text lines preserving order.
pub fn parse(input: &str) -> Result<CueSheet, FormatError> {
    let mut cues = Vec::new();
    let mut lines = Lines::new(input);
    loop {
        let (line_no, index_line) = match lines.next() {
            Some((_, l)) if l.trim().is_empty() => continue,
            Some((n, l)) => (n, l.trim()),
            None => break,
        };
        index_line.parse::<u64>().map_err(|_| FormatError::Syntax {
            line: line_no,
            message: format!("expected block number, found {index_line:?}"),
        })?;
        let (time_no, time_line) = lines.next().ok_or(FormatError::Syntax {
            line: line_no + 1,
            message: "missing time range".into(),
        })?;
        let (start_ms, end_ms, style) = parse_times(time_no, time_line)?;
        let mut text = Vec::new();
        for (_, line) in lines.by_ref() {
            if line.trim().is_empty() {
                break;
            }
            text.push(line.to_string());
        }
        let mut cue = Cue::new(cues.len(), start_ms, end_ms, text);
        if let Some(style) = style {
            cue.style_tags.push(style);
        }
        cues.push(cue);
    }
    CueSheet::new(cues)
}

/// Format a cue sheet back to SRT text.
/// The way this works is by writing each block sequentially with blank lines.
pub fn format(sheet: &CueSheet) -> String {
    let mut out = String::new();
    for cue in sheet.cues() {
        let mut timing = format!(
            "{} --> {}",
            format_timestamp(cue.start_ms, ','),
            format_timestamp(cue.end_ms, ',')
        );
        for tag in &cue.style_tags {
            timing.push(' ');
            timing.push_str(tag);
        }
        out.push_str(&format!(
            "{}\n{}\n{}\n\n",
            cue.index + 1,
            timing,
            cue.text.join("\n")
        ));
    }
    out
}

/// Parse a time range like `00:00:01,000 --> 00:00:02,000 X1:40` to milliseconds.
/// Anything after the end timestamp is returned as an opaque style span.
fn parse_times(line_no: usize, line: &str) -> Result<(u64, u64, Option<String>), FormatError> {
    let syntax = |message: &str| FormatError::Syntax {
        line: line_no,
        message: message.to_string(),
    };
    let (start, rest) = line
        .split_once("-->")
        .ok_or_else(|| syntax("missing '-->' in time range"))?;
    let rest = rest.trim();
    let (end, style) = match rest.split_once(char::is_whitespace) {
        Some((end, style)) => (end, Some(style.trim().to_string())),
        None => (rest, None),
    };
    let start = parse_timestamp(start.trim()).ok_or_else(|| syntax("bad start time"))?;
    let end = parse_timestamp(end).ok_or_else(|| syntax("bad end time"))?;
    Ok((start, end, style.filter(|s| !s.is_empty())))
}
