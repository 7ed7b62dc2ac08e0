//! Binary entry point for the subtitle translator.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use subtrans_core::language::{self, COMMON_TAGS};
use subtrans_core::translate::default_output_path;
use subtrans_core::{
    translate_file, BackendType, CancelHandle, JobContext, JobStatus, Settings, SubtitleFormat,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Command line options for the binary.
#[derive(Parser)]
#[command(version, about = "Translate SRT and WebVTT subtitles")]
struct Cli {
    /// SRT or WebVTT file, or a directory of them.
    #[arg(required_unless_present = "list_languages")]
    input: Option<PathBuf>,

    /// Output file, or a directory (existing or ending in '/') for several
    /// inputs; defaults to `<stem>_<target>.<ext>` next to each input.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Descend into subdirectories when the input is a directory.
    #[arg(short, long)]
    recursive: bool,

    /// Replace output files that already exist instead of skipping them.
    #[arg(long)]
    overwrite: bool,

    /// Print the common language tags and exit.
    #[arg(long)]
    list_languages: bool,

    /// JSON settings file; command line flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Translation provider: nllb, deepl, google, gemini or hf.
    #[arg(long)]
    backend: Option<BackendType>,

    /// Provider URL, for self-hosted servers or proxies.
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long, env = "SUBTRANS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long)]
    source_lang: Option<String>,

    #[arg(long)]
    target_lang: Option<String>,

    /// Maximum number of cues per request.
    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    max_retries: Option<u32>,

    /// Number of requests in flight at once.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    /// Model name for the Gemini and Hugging Face backends.
    #[arg(long)]
    model: Option<String>,

    /// Gemini instruction; may use {source_language}, {target_language} and {TONE}.
    #[arg(long)]
    prompt_template: Option<String>,

    /// Tone for Gemini translations, e.g. "formal".
    #[arg(long)]
    tone: Option<String>,

    /// Enable verbose debug and trace logs.
    #[arg(long)]
    debug: bool,
}

impl Cli {
    /// Settings from the config file (or defaults) with flags applied on top.
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
            }
            None => Settings::default(),
        };
        if let Some(backend) = self.backend {
            settings.backend_type = backend;
        }
        if self.endpoint.is_some() {
            settings.endpoint = self.endpoint.clone();
        }
        if self.api_key.is_some() {
            settings.api_key = self.api_key.clone();
        }
        if let Some(lang) = &self.source_lang {
            settings.source_lang = lang.clone();
        }
        if let Some(lang) = &self.target_lang {
            settings.target_lang = lang.clone();
        }
        if self.batch_size.is_some() {
            settings.batch_size = self.batch_size;
        }
        if let Some(retries) = self.max_retries {
            settings.max_retries = retries;
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            settings.timeout_secs = timeout;
        }
        if self.model.is_some() {
            settings.model = self.model.clone();
        }
        if self.prompt_template.is_some() {
            settings.prompt_template = self.prompt_template.clone();
        }
        if self.tone.is_some() {
            settings.tone = self.tone.clone();
        }
        Ok(settings)
    }
}

/// Subtitle files to translate: the input itself, or the SRT and WebVTT
/// files of a directory in path order.
fn collect_inputs(input: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("path does not exist: {}", input.display());
    }
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in WalkDir::new(input).max_depth(max_depth).follow_links(true) {
        let entry = entry.with_context(|| format!("reading {}", input.display()))?;
        let path = entry.path();
        if path.is_file() && SubtitleFormat::from_path(path).is_ok() {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Whether `-o` names a directory rather than a file.
fn is_dir_target(output: &Path) -> bool {
    output.is_dir() || output.to_string_lossy().ends_with(['/', '\\'])
}

/// Where the translation of `input` is written.
fn output_for(input: &Path, output: Option<&Path>, target_lang: &str) -> Result<PathBuf> {
    match output {
        Some(dir) if is_dir_target(dir) => {
            let name = input
                .file_name()
                .with_context(|| format!("{} has no file name", input.display()))?;
            Ok(dir.join(name))
        }
        Some(file) => Ok(file.to_path_buf()),
        None => Ok(default_output_path(
            input,
            target_lang,
            SubtitleFormat::from_path(input)?,
        )),
    }
}

fn print_languages() {
    let width = COMMON_TAGS.iter().map(|t| t.len()).max().unwrap_or(4).max(4);
    println!("{:<width$}  Language", "Code");
    println!("{}", "-".repeat(width + 2 + 30));
    for tag in COMMON_TAGS {
        println!("{:<width$}  {}", tag, language::display_name(tag));
    }
}

/// Translate one file with its own progress reporting.
/// Returns the job status, or `None` when the file was skipped or failed.
async fn process_file(
    input: &Path,
    out_path: &Path,
    settings: &Settings,
    cancel: &CancelHandle,
    overwrite: bool,
) -> Option<JobStatus> {
    if out_path.exists() && !overwrite {
        warn!(
            "skipping {}: {} exists, use --overwrite to replace it",
            input.display(),
            out_path.display()
        );
        return None;
    }
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(err) = fs::create_dir_all(parent) {
            error!("cannot create {}: {}", parent.display(), err);
            return None;
        }
    }

    let ctx = JobContext::new(cancel.clone());
    let mut progress = ctx.progress.subscribe();
    let reporter = tokio::spawn(async move {
        let mut last = None;
        while progress.changed().await.is_ok() {
            let snap = *progress.borrow_and_update();
            if snap.total > 0 && last != Some(snap.percent()) {
                info!("completed {}% ({}/{})", snap.percent(), snap.done(), snap.total);
                last = Some(snap.percent());
            }
        }
    });

    info!("translating {} -> {}", input.display(), out_path.display());
    let result = translate_file(input, Some(out_path), settings, &ctx).await;
    reporter.abort();
    let report = match result {
        Ok((_, report)) => report,
        Err(err) => {
            error!("{}: {}", input.display(), err);
            return None;
        }
    };

    for failure in &report.errors {
        warn!(
            "cue {} kept its source text: {}: {}",
            failure.cue_index + 1,
            failure.kind,
            failure.message
        );
    }
    info!(
        "{} of {} cues translated, {} failed; output in {}",
        report.completed,
        report.total,
        report.failed,
        out_path.display()
    );
    Some(report.status)
}

/// Application entry point which parses CLI args and runs one job per file.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug {
        EnvFilter::default()
            .add_directive("subtrans=trace".parse()?)
            .add_directive("subtrans_core=trace".parse()?)
            .add_directive("info".parse()?)
    } else {
        EnvFilter::default()
            .add_directive("subtrans=info".parse()?)
            .add_directive("subtrans_core=info".parse()?)
            .add_directive("warn".parse()?)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if cli.list_languages {
        print_languages();
        return Ok(());
    }
    let Some(input) = cli.input.as_deref() else {
        bail!("an input file or directory is required");
    };

    let settings = cli.settings()?;
    let files = collect_inputs(input, cli.recursive)?;
    if files.is_empty() {
        bail!("no SRT or WebVTT files found in {}", input.display());
    }
    if let Some(out) = cli.output.as_deref() {
        if files.len() > 1 && !is_dir_target(out) {
            bail!(
                "{} inputs need an output directory, got {}",
                files.len(),
                out.display()
            );
        }
    }

    let cancel = CancelHandle::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing requests already in flight");
            interrupt.cancel();
        }
    });

    let mut succeeded = 0;
    for file in &files {
        if cancel.is_cancelled() {
            break;
        }
        let out_path = output_for(file, cli.output.as_deref(), &settings.target_lang)?;
        match process_file(file, &out_path, &settings, &cancel, cli.overwrite).await {
            Some(JobStatus::Cancelled) => break,
            Some(_) => succeeded += 1,
            None => {}
        }
    }

    info!("processed {} of {} files successfully", succeeded, files.len());
    if cancel.is_cancelled() {
        bail!("translation cancelled; untranslated cues keep their source text");
    }
    if succeeded == 0 {
        bail!("no file was translated");
    }
    Ok(())
}
