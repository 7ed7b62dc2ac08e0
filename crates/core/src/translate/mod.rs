//! Translation orchestration.
//! This module wires parsing, batching, dispatch and reassembly into a job.

use crate::backend::{create_backend, Backend};
use crate::config::Settings;
use crate::cue::CueSheet;
use crate::error::JobError;
use crate::format::{self, SubtitleFormat};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

pub mod batcher;
pub mod dispatch;
pub mod progress;
pub mod reassemble;
pub mod unit;

use batcher::Batcher;
use dispatch::{Dispatcher, RetryPolicy};
use progress::ProgressTracker;
use reassemble::{Reassembler, UnitFailure};

/// Cooperative cancellation flag shared between a job and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop submitting new batches; in-flight ones still finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// State owned by one job invocation: its progress counters and the
/// cancellation flag the caller may trip.
#[derive(Debug, Default)]
pub struct JobContext {
    pub progress: ProgressTracker,
    pub cancel: CancelHandle,
}

impl JobContext {
    pub fn new(cancel: CancelHandle) -> Self {
        Self {
            progress: ProgressTracker::new(),
            cancel,
        }
    }
}

/// Terminal state of a job that produced output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    PartialFailure,
    Cancelled,
}

/// Summary handed back to the caller once a job ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub status: JobStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Every unit that kept its source text; always `failed` entries long.
    pub errors: Vec<UnitFailure>,
}

/// Per-job knobs taken from [`Settings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    pub source_lang: String,
    pub target_lang: String,
    pub batch_size: Option<usize>,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl From<&Settings> for JobOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            source_lang: settings.source_lang.clone(),
            target_lang: settings.target_lang.clone(),
            batch_size: settings.batch_size,
            concurrency: settings.concurrency,
            retry: RetryPolicy {
                max_retries: settings.max_retries,
                base_delay: Duration::from_millis(settings.retry_base_delay_ms),
                max_delay: Duration::from_millis(settings.retry_max_delay_ms),
            },
        }
    }
}

/// One translation run over a cue sheet with a fixed backend.
pub struct TranslationJob {
    backend: Arc<dyn Backend>,
    options: JobOptions,
}

impl TranslationJob {
    pub fn new(backend: Arc<dyn Backend>, options: JobOptions) -> Self {
        Self { backend, options }
    }

    /// Validate `settings` and build the backend they select.
    pub fn from_settings(settings: &Settings) -> Result<Self, JobError> {
        settings.validate()?;
        let backend = create_backend(settings)?;
        Ok(Self::new(backend, JobOptions::from(settings)))
    }

    /// Translate every cue of `sheet`.
    /// The way this works is by flattening cues into units, splitting them into
    /// batches under the backend's limits and applying each finished batch as
    /// it arrives. `sheet` is only replaced when the job ends without a
    /// job-fatal error.
    pub async fn run(&self, sheet: &mut CueSheet, ctx: &JobContext) -> Result<JobReport, JobError> {
        trace!("TranslationJob::run cues={} backend={}", sheet.len(), self.backend.name());
        let begin = Instant::now();
        let units = unit::extract_units(sheet);
        let total = units.len();
        ctx.progress.start(total);
        let batches = Batcher::new(&self.backend.limits(), self.options.batch_size).split(
            units,
            &self.options.source_lang,
            &self.options.target_lang,
        );
        info!(
            "translating {} cues in {} batches with {}",
            total,
            batches.len(),
            self.backend.name()
        );

        let dispatcher = Dispatcher::new(
            self.backend.clone(),
            self.options.concurrency,
            self.options.retry.clone(),
        );
        let mut working = sheet.clone();
        let mut reassembler = Reassembler::new(&mut working);
        let mut apply_error = None;
        let summary = dispatcher
            .run(batches, ctx, |outcome| {
                if apply_error.is_some() {
                    return;
                }
                match reassembler.apply(&outcome) {
                    Ok(applied) => ctx.progress.record(applied.translated, applied.failed),
                    Err(err) => apply_error = Some(err),
                }
                let snap = ctx.progress.snapshot();
                debug!("completed {}%", snap.percent());
            })
            .await;

        if let Some(err) = apply_error {
            return Err(err.into());
        }
        if let Some(err) = summary.auth_failure {
            return Err(JobError::Auth(err.message().to_string()));
        }
        let errors = reassembler.into_failures();
        *sheet = working;

        let snap = ctx.progress.snapshot();
        let status = if summary.cancelled {
            JobStatus::Cancelled
        } else if snap.failed > 0 {
            JobStatus::PartialFailure
        } else {
            JobStatus::Succeeded
        };
        info!(
            "job {:?}: {} translated, {} failed of {} in {} ms",
            status,
            snap.completed,
            snap.failed,
            total,
            begin.elapsed().as_millis()
        );
        Ok(JobReport {
            status,
            total,
            completed: snap.completed,
            failed: snap.failed,
            errors,
        })
    }
}

/// Default output location: `<stem>_<target>.<ext>` next to the input.
pub fn default_output_path(input: &Path, target_lang: &str, format: SubtitleFormat) -> PathBuf {
    input.with_file_name(format!(
        "{}_{}.{}",
        input.file_stem().unwrap_or_default().to_string_lossy(),
        target_lang,
        format.extension()
    ))
}

/// Translate a subtitle file and write the result.
/// Nothing is written when the job fails as a whole.
pub async fn translate_file(
    input: &Path,
    output: Option<&Path>,
    settings: &Settings,
    ctx: &JobContext,
) -> Result<(PathBuf, JobReport), JobError> {
    trace!("translate_file input={}", input.display());
    let format = SubtitleFormat::from_path(input)?;
    info!("reading subtitles from {}", input.display());
    let mut sheet = format::parse(&fs::read(input)?, format)?;
    let job = TranslationJob::from_settings(settings)?;
    let report = job.run(&mut sheet, ctx).await?;

    let out_path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output_path(input, &settings.target_lang, format));
    fs::write(&out_path, format::serialize(&sheet, format))?;
    info!("wrote {}", out_path.display());
    Ok((out_path, report))
}
