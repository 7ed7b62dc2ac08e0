//! Grouping of translation units into provider-sized batches.

use super::unit::TranslationUnit;
use crate::backend::BackendLimits;
use tracing::{debug, trace};

/// A bounded group of units submitted to a backend in one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: usize,
    pub units: Vec<TranslationUnit>,
    pub source_lang: String,
    pub target_lang: String,
    /// Set when a single unit alone exceeds the character limit.
    pub oversized: bool,
}

impl Batch {
    pub fn char_len(&self) -> usize {
        self.units.iter().map(TranslationUnit::char_len).sum()
    }

    /// Source texts in unit order, as sent to providers.
    pub fn texts(&self) -> Vec<&str> {
        self.units.iter().map(|u| u.source_text.as_str()).collect()
    }
}

/// Splits the ordered unit list greedily under character and item bounds.
#[derive(Debug, Clone)]
pub struct Batcher {
    max_chars: usize,
    max_items: usize,
}

impl Batcher {
    /// Build a batcher from backend limits and an optional item-count hint.
    /// The hint can only tighten the backend's own item limit.
    pub fn new(limits: &BackendLimits, batch_size: Option<usize>) -> Self {
        let max_items = batch_size
            .filter(|&n| n > 0)
            .map_or(limits.max_batch_items, |n| n.min(limits.max_batch_items));
        Self {
            max_chars: limits.max_batch_chars.max(1),
            max_items: max_items.max(1),
        }
    }

    /// Group `units` into batches preserving their order.
    /// The way this works is by closing the current batch whenever adding the
    /// next unit would break either bound; oversized units get a batch alone.
    pub fn split(&self, units: Vec<TranslationUnit>, source_lang: &str, target_lang: &str) -> Vec<Batch> {
        trace!(
            "Batcher::split units={} max_chars={} max_items={}",
            units.len(),
            self.max_chars,
            self.max_items
        );
        let mut batches = Vec::new();
        let mut current: Vec<TranslationUnit> = Vec::new();
        let mut current_chars = 0;
        let close = |units: Vec<TranslationUnit>, oversized: bool, batches: &mut Vec<Batch>| {
            batches.push(Batch {
                id: batches.len(),
                units,
                source_lang: source_lang.to_string(),
                target_lang: target_lang.to_string(),
                oversized,
            });
        };

        for unit in units {
            let len = unit.char_len();
            if len > self.max_chars {
                if !current.is_empty() {
                    close(std::mem::take(&mut current), false, &mut batches);
                    current_chars = 0;
                }
                debug!(
                    "cue {} has {} chars, over the {} limit; isolating it",
                    unit.cue_index, len, self.max_chars
                );
                close(vec![unit], true, &mut batches);
                continue;
            }
            if !current.is_empty()
                && (current_chars + len > self.max_chars || current.len() + 1 > self.max_items)
            {
                close(std::mem::take(&mut current), false, &mut batches);
                current_chars = 0;
            }
            current_chars += len;
            current.push(unit);
        }
        if !current.is_empty() {
            close(current, false, &mut batches);
        }
        debug!("split into {} batches", batches.len());
        batches
    }
}
