//! Scripted backends shared by the pipeline tests.

use super::{Backend, BackendLimits, BackendResult};
use crate::error::BackendError;
use crate::translate::batcher::Batch;
use crate::translate::unit::TranslationUnit;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

type Handler = dyn Fn(&Batch, usize) -> Result<BackendResult, BackendError> + Send + Sync;

/// One recorded call: which batch and when.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Call {
    pub batch_id: usize,
    pub at: Instant,
}

/// Backend whose answers come from a closure receiving the batch and the
/// 1-based attempt number for that batch.
pub(crate) struct MockBackend {
    limits: BackendLimits,
    handler: Box<Handler>,
    delay: Duration,
    calls: Mutex<Vec<Call>>,
}

impl MockBackend {
    pub fn new(
        handler: impl Fn(&Batch, usize) -> Result<BackendResult, BackendError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            limits: BackendLimits {
                max_batch_chars: 1_000,
                max_batch_items: 10,
                requests_per_second: None,
            },
            handler: Box::new(handler),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Returns every unit unchanged.
    pub fn echo() -> Self {
        Self::new(|batch, _| translate_with(batch, |t| t.to_string()))
    }

    pub fn with_limits(mut self, limits: BackendLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, batch_id: usize) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.batch_id == batch_id)
            .collect()
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    async fn translate(&self, batch: &Batch) -> Result<BackendResult, BackendError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                batch_id: batch.id,
                at: Instant::now(),
            });
            calls.iter().filter(|c| c.batch_id == batch.id).count()
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.handler)(batch, attempt)
    }
}

/// Build a successful result by mapping every source text.
pub(crate) fn translate_with(
    batch: &Batch,
    f: impl Fn(&str) -> String,
) -> Result<BackendResult, BackendError> {
    BackendResult::from_translations(batch, batch.units.iter().map(|u| f(&u.source_text)).collect())
}

/// A batch of plain units numbered from zero.
pub(crate) fn batch_of(texts: &[&str], source_lang: &str, target_lang: &str) -> Batch {
    Batch {
        id: 0,
        units: texts
            .iter()
            .enumerate()
            .map(|(i, t)| TranslationUnit {
                cue_index: i,
                source_text: t.to_string(),
                placeholders: Vec::new(),
                line_count: 1,
            })
            .collect(),
        source_lang: source_lang.to_string(),
        target_lang: target_lang.to_string(),
        oversized: false,
    }
}
