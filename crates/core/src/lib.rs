//! Core library for translating subtitle files through pluggable providers.

pub mod backend;
pub mod config;
pub mod cue;
pub mod error;
pub mod format;
pub mod language;
pub mod translate;

pub use config::{BackendType, Settings};
pub use cue::{Cue, CueSheet};
pub use error::{BackendError, ErrorKind, JobError};
pub use format::SubtitleFormat;
pub use translate::{
    translate_file, CancelHandle, JobContext, JobReport, JobStatus, TranslationJob,
};
