//! In-memory model of a subtitle file's timed text units.
//! Timing and style tags are immutable once parsed; only text is replaced.

use crate::error::{CueError, FormatError};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// A single timed subtitle entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cue {
    /// Position in the sheet, contiguous from zero.
    pub index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    /// Text lines in display order.
    pub text: Vec<String>,
    /// Opaque cue-level markup (SRT coordinates, WebVTT settings) kept verbatim.
    #[serde(default)]
    pub style_tags: Vec<String>,
    /// WebVTT cue identifier, if the source had one.
    #[serde(default)]
    pub label: Option<String>,
}

impl Cue {
    /// Build a cue with plain text and no style tags.
    pub fn new(index: usize, start_ms: u64, end_ms: u64, text: Vec<String>) -> Self {
        Self {
            index,
            start_ms,
            end_ms,
            text,
            style_tags: Vec::new(),
            label: None,
        }
    }
}

/// Ordered cues of one subtitle file plus any verbatim file header.
/// Deserialized sheets go through the same checks as [`CueSheet::new`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawCueSheet")]
pub struct CueSheet {
    cues: Vec<Cue>,
    /// Raw header blocks (e.g. the WebVTT signature and STYLE blocks).
    header: Vec<String>,
}

/// Unchecked wire form of a [`CueSheet`].
#[derive(Deserialize)]
struct RawCueSheet {
    cues: Vec<Cue>,
    #[serde(default)]
    header: Vec<String>,
}

impl TryFrom<RawCueSheet> for CueSheet {
    type Error = FormatError;

    fn try_from(raw: RawCueSheet) -> Result<Self, Self::Error> {
        Self::with_header(raw.cues, raw.header)
    }
}

impl CueSheet {
    /// Accept cues from a parser, checking ordering and timing invariants.
    /// This function should reject sheets whose indices are not contiguous from zero.
    pub fn new(cues: Vec<Cue>) -> Result<Self, FormatError> {
        Self::with_header(cues, Vec::new())
    }

    pub fn with_header(cues: Vec<Cue>, header: Vec<String>) -> Result<Self, FormatError> {
        trace!("CueSheet::with_header cues={}", cues.len());
        let mut prev_start = 0;
        for (pos, cue) in cues.iter().enumerate() {
            if cue.index != pos {
                return Err(FormatError::Invariant {
                    index: pos,
                    message: format!("expected index {pos}, found {}", cue.index),
                });
            }
            if cue.start_ms >= cue.end_ms {
                return Err(FormatError::Invariant {
                    index: pos,
                    message: format!(
                        "start {}ms is not before end {}ms",
                        cue.start_ms, cue.end_ms
                    ),
                });
            }
            if cue.start_ms < prev_start {
                return Err(FormatError::Invariant {
                    index: pos,
                    message: format!(
                        "start {}ms precedes previous cue start {}ms",
                        cue.start_ms, prev_start
                    ),
                });
            }
            prev_start = cue.start_ms;
        }
        Ok(Self { cues, header })
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn get(&self, index: usize) -> Option<&Cue> {
        self.cues.get(index)
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    /// Replace the text of one cue, leaving timing and style tags untouched.
    pub fn set_translated_text(&mut self, index: usize, lines: Vec<String>) -> Result<(), CueError> {
        let len = self.cues.len();
        let cue = self
            .cues
            .get_mut(index)
            .ok_or(CueError::OutOfRange { index, len })?;
        cue.text = lines;
        Ok(())
    }
}
