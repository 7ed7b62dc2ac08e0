//! Flattening of cues into translation units.
//! Inline markup is swapped for `{N}` tokens so providers cannot corrupt it.

use crate::cue::{Cue, CueSheet};
use crate::error::PlaceholderMismatch;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use tracing::trace;

/// HTML-like tags (`<i>`, `</font>`, WebVTT `<v Name>` and timestamps) and
/// brace override blocks such as `{\an8}`.
static MARKUP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"</?[A-Za-z0-9][^<>]*>|\{[^{}]*\}").expect("Invalid markup regex")
});

/// Placeholder tokens as they come back from a provider, tolerating inner spaces.
static TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\s*(\d+)\s*\}").expect("Invalid token regex"));

/// One markup fragment replaced by a token in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub token: String,
    pub markup: String,
}

/// The translatable text of one cue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    /// Index of the owning cue; doubles as the unit id.
    pub cue_index: usize,
    /// Cue lines joined by `\n` with markup replaced by tokens.
    pub source_text: String,
    pub placeholders: Vec<Placeholder>,
    /// Number of lines the cue had in the source file.
    pub line_count: usize,
}

impl TranslationUnit {
    /// Flatten a cue, returning `None` when it has nothing to translate.
    pub fn from_cue(cue: &Cue) -> Option<Self> {
        let joined = cue.text.join("\n");
        let mut placeholders = Vec::new();
        let source_text = MARKUP_REGEX
            .replace_all(&joined, |caps: &Captures| {
                let token = format!("{{{}}}", placeholders.len());
                placeholders.push(Placeholder {
                    token: token.clone(),
                    markup: caps[0].to_string(),
                });
                token
            })
            .into_owned();
        let bare = MARKUP_REGEX.replace_all(&joined, "");
        if bare.trim().is_empty() {
            trace!("cue {} has no translatable text", cue.index);
            return None;
        }
        Some(Self {
            cue_index: cue.index,
            source_text,
            placeholders,
            line_count: cue.text.len().max(1),
        })
    }

    pub fn id(&self) -> usize {
        self.cue_index
    }

    /// Length in characters, the unit the batch limits are expressed in.
    pub fn char_len(&self) -> usize {
        self.source_text.chars().count()
    }

    /// Put the original markup back in place of every token in `translated`.
    /// Fails when a token of the source is absent from the translation.
    pub fn restore(&self, translated: &str) -> Result<String, PlaceholderMismatch> {
        let mut used = vec![false; self.placeholders.len()];
        let restored = TOKEN_REGEX.replace_all(translated, |caps: &Captures| {
            let id = caps[1].parse::<usize>().ok();
            match id.filter(|&i| i < used.len() && !used[i]) {
                Some(i) => {
                    used[i] = true;
                    self.placeholders[i].markup.clone()
                }
                None => caps[0].to_string(),
            }
        });
        let missing: Vec<String> = self
            .placeholders
            .iter()
            .zip(&used)
            .filter(|(_, used)| !**used)
            .map(|(p, _)| p.token.clone())
            .collect();
        if !missing.is_empty() {
            return Err(PlaceholderMismatch { missing });
        }
        Ok(restored.into_owned())
    }
}

/// Rewrite padded tokens such as `{ 0 }` as `{0}` so they survive
/// whitespace-based line breaking.
pub fn compact_tokens(text: &str) -> Cow<'_, str> {
    TOKEN_REGEX.replace_all(text, "{$1}")
}

/// Extract units for every cue with translatable text, in cue order.
pub fn extract_units(sheet: &CueSheet) -> Vec<TranslationUnit> {
    sheet.cues().iter().filter_map(TranslationUnit::from_cue).collect()
}
