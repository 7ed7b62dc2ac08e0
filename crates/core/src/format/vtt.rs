//! WebVTT parsing and formatting.
//! Header, STYLE and REGION blocks are kept verbatim; NOTE blocks are dropped.

use super::{format_timestamp, parse_timestamp, Lines};
use crate::cue::{Cue, CueSheet};
use crate::error::FormatError;

const SIGNATURE: &str = "WEBVTT";

/// Parse WebVTT text into a cue sheet.
pub fn parse(input: &str) -> Result<CueSheet, FormatError> {
    let mut lines = Lines::new(input);
    let mut header = Vec::new();
    match lines.next() {
        Some((_, first)) if first.starts_with(SIGNATURE) => {
            header.push(read_block(first, &mut lines));
        }
        _ => {
            return Err(FormatError::Syntax {
                line: 1,
                message: "missing WEBVTT signature".into(),
            })
        }
    }

    let mut cues = Vec::new();
    while let Some((line_no, line)) = lines.next() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with("NOTE") {
            read_block(line, &mut lines);
            continue;
        }
        if cues.is_empty() && (line.starts_with("STYLE") || line.starts_with("REGION")) {
            header.push(read_block(line, &mut lines));
            continue;
        }
        let (label, time_no, time_line) = if line.contains("-->") {
            (None, line_no, line)
        } else {
            let (n, next) = lines.next().ok_or(FormatError::Syntax {
                line: line_no + 1,
                message: "cue identifier without timing".into(),
            })?;
            (Some(line.to_string()), n, next)
        };
        let (start_ms, end_ms, settings) = parse_timing(time_no, time_line)?;
        let mut text = Vec::new();
        for (_, l) in lines.by_ref() {
            if l.trim().is_empty() {
                break;
            }
            text.push(l.to_string());
        }
        let mut cue = Cue::new(cues.len(), start_ms, end_ms, text);
        cue.style_tags = settings;
        cue.label = label;
        cues.push(cue);
    }
    CueSheet::with_header(cues, header)
}

/// Format a cue sheet as WebVTT, emitting the stored header first.
pub fn format(sheet: &CueSheet) -> String {
    let mut out = String::new();
    if sheet.header().is_empty() {
        out.push_str(SIGNATURE);
        out.push_str("\n\n");
    }
    for block in sheet.header() {
        out.push_str(block);
        out.push_str("\n\n");
    }
    for cue in sheet.cues() {
        if let Some(label) = &cue.label {
            out.push_str(label);
            out.push('\n');
        }
        out.push_str(&format_timestamp(cue.start_ms, '.'));
        out.push_str(" --> ");
        out.push_str(&format_timestamp(cue.end_ms, '.'));
        for setting in &cue.style_tags {
            out.push(' ');
            out.push_str(setting);
        }
        out.push('\n');
        for line in &cue.text {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// Collect `first` and every following line up to a blank line.
fn read_block(first: &str, lines: &mut Lines<'_>) -> String {
    let mut block = vec![first.to_string()];
    for (_, line) in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }
        block.push(line.to_string());
    }
    block.join("\n")
}

fn parse_timing(line_no: usize, line: &str) -> Result<(u64, u64, Vec<String>), FormatError> {
    let syntax = |message: &str| FormatError::Syntax {
        line: line_no,
        message: message.to_string(),
    };
    let (start, rest) = line
        .split_once("-->")
        .ok_or_else(|| syntax("missing '-->' in cue timing"))?;
    let mut parts = rest.split_whitespace();
    let end = parts.next().ok_or_else(|| syntax("missing end time"))?;
    let start = parse_timestamp(start.trim()).ok_or_else(|| syntax("bad start time"))?;
    let end = parse_timestamp(end).ok_or_else(|| syntax("bad end time"))?;
    Ok((start, end, parts.map(str::to_string).collect()))
}
