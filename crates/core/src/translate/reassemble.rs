//! Writing finished batches back into the cue sheet.

use super::dispatch::BatchOutcome;
use super::unit::{compact_tokens, TranslationUnit};
use crate::cue::CueSheet;
use crate::error::{CueError, ErrorKind};
use serde::Serialize;
use tracing::{trace, warn};

/// A unit whose cue kept its source text, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub cue_index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

/// Units of one batch that were written back or given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Applied {
    pub translated: usize,
    pub failed: usize,
}

/// Applies batch outcomes to a cue sheet and collects per-unit failures.
/// Failed units leave their cue untouched so the output stays complete.
/// This is the one place a unit is judged translated or failed.
pub struct Reassembler<'a> {
    sheet: &'a mut CueSheet,
    failures: Vec<UnitFailure>,
}

impl<'a> Reassembler<'a> {
    pub fn new(sheet: &'a mut CueSheet) -> Self {
        Self {
            sheet,
            failures: Vec::new(),
        }
    }

    /// Apply every unit of a finished batch and report how many were
    /// written back.
    pub fn apply(&mut self, outcome: &BatchOutcome) -> Result<Applied, CueError> {
        trace!(
            "Reassembler::apply batch={} units={}",
            outcome.batch.id,
            outcome.batch.units.len()
        );
        let mut applied = Applied::default();
        match &outcome.result {
            Ok(result) => {
                for (unit, unit_outcome) in outcome.batch.units.iter().zip(&result.per_unit) {
                    let written = match &unit_outcome.result {
                        Ok(text) => self.apply_unit(unit, text)?,
                        Err(err) => {
                            self.fail(unit.cue_index, err.kind, err.message.clone());
                            false
                        }
                    };
                    if written {
                        applied.translated += 1;
                    } else {
                        applied.failed += 1;
                    }
                }
            }
            Err(err) => {
                for unit in &outcome.batch.units {
                    self.fail(unit.cue_index, err.kind(), err.message().to_string());
                }
                applied.failed = outcome.batch.units.len();
            }
        }
        Ok(applied)
    }

    /// Write one translation back; `false` means the cue kept its source.
    /// Lines are laid out on the token text so that markup containing
    /// spaces is never broken apart.
    fn apply_unit(&mut self, unit: &TranslationUnit, translated: &str) -> Result<bool, CueError> {
        if translated.trim().is_empty() {
            self.fail(unit.cue_index, ErrorKind::Provider, "empty translation".into());
            return Ok(false);
        }
        let laid_out = reflow(&compact_tokens(translated), unit.line_count).join("\n");
        match unit.restore(&laid_out) {
            Ok(restored) => {
                let lines = restored.split('\n').map(str::to_string).collect();
                self.sheet.set_translated_text(unit.cue_index, lines)?;
                Ok(true)
            }
            Err(mismatch) => {
                warn!("cue {}: {}; keeping source text", unit.cue_index, mismatch);
                self.fail(unit.cue_index, ErrorKind::PlaceholderMismatch, mismatch.to_string());
                Ok(false)
            }
        }
    }

    fn fail(&mut self, cue_index: usize, kind: ErrorKind, message: String) {
        self.failures.push(UnitFailure {
            cue_index,
            kind,
            message,
        });
    }

    /// Failures ordered by cue index.
    pub fn into_failures(self) -> Vec<UnitFailure> {
        let mut failures = self.failures;
        failures.sort_by_key(|f| f.cue_index);
        failures
    }
}

/// Fit translated text to the line count its cue had in the source.
/// Text with the right number of lines is kept as the provider broke it;
/// otherwise single-line cues are joined and multi-line cues are rebalanced
/// on word boundaries.
pub fn reflow(text: &str, line_count: usize) -> Vec<String> {
    let lines: Vec<&str> = text.lines().map(str::trim_end).filter(|l| !l.trim().is_empty()).collect();
    if lines.len() == line_count.max(1) {
        return lines.into_iter().map(str::to_string).collect();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    if line_count <= 1 {
        return vec![words.join(" ")];
    }
    balance(&words, line_count)
}

/// Split words into `count` lines of similar length.
fn balance(words: &[&str], count: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(count);
    let mut rest = words;
    for remaining in (1..=count).rev() {
        if rest.is_empty() {
            break;
        }
        if remaining == 1 {
            out.push(rest.join(" "));
            break;
        }
        if rest.len() <= remaining {
            out.extend(rest.iter().map(|w| w.to_string()));
            break;
        }
        let rest_len = rest.iter().map(|w| w.chars().count()).sum::<usize>() + rest.len() - 1;
        let target = rest_len / remaining;
        let mut take = 1;
        let mut len = rest[0].chars().count();
        while take < rest.len() - (remaining - 1) {
            let next = len + 1 + rest[take].chars().count();
            if next > target && next - target >= target.saturating_sub(len) {
                break;
            }
            len = next;
            take += 1;
        }
        out.push(rest[..take].join(" "));
        rest = &rest[take..];
    }
    out
}
