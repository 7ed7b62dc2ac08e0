//! Error taxonomy shared by every stage of the translation pipeline.
//! Unit and batch scoped errors are recorded; job scoped errors abort the run.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Category of a failure as reported to the user in the final job report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Format,
    Auth,
    RateLimit,
    Transient,
    Provider,
    PlaceholderMismatch,
    OutOfRange,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Format => "format error",
            ErrorKind::Auth => "authentication error",
            ErrorKind::RateLimit => "rate limit error",
            ErrorKind::Transient => "transient error",
            ErrorKind::Provider => "provider error",
            ErrorKind::PlaceholderMismatch => "placeholder mismatch",
            ErrorKind::OutOfRange => "index out of range",
        };
        f.write_str(name)
    }
}

/// Failure raised by a backend adapter for a whole batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Credentials were rejected. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The provider throttled the request.
    #[error("rate limited: {0}")]
    RateLimit(String),

    /// Network fault or timeout.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Any other unexpected answer, carrying the provider's message.
    #[error("provider error: {0}")]
    Provider(String),
}

impl BackendError {
    /// Whether the dispatcher may schedule another attempt for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::RateLimit(_) | BackendError::Transient(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Auth(_) => ErrorKind::Auth,
            BackendError::RateLimit(_) => ErrorKind::RateLimit,
            BackendError::Transient(_) => ErrorKind::Transient,
            BackendError::Provider(_) => ErrorKind::Provider,
        }
    }

    /// The message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            BackendError::Auth(m)
            | BackendError::RateLimit(m)
            | BackendError::Transient(m)
            | BackendError::Provider(m) => m,
        }
    }
}

/// Failure of a single translation unit inside an otherwise answered batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct UnitError {
    pub kind: ErrorKind,
    pub message: String,
}

impl UnitError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&BackendError> for UnitError {
    fn from(err: &BackendError) -> Self {
        Self::new(err.kind(), err.message())
    }
}

/// Raised when a cue index does not exist in the cue sheet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CueError {
    #[error("cue index {index} out of range (sheet has {len} cues)")]
    OutOfRange { index: usize, len: usize },
}

/// Unparseable or structurally invalid subtitle input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("cue {index}: {message}")]
    Invariant { index: usize, message: String },

    #[error("unsupported subtitle format: {0}")]
    Unsupported(String),

    #[error("input is not valid UTF-8")]
    Encoding,
}

/// A placeholder present in the source did not survive translation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("placeholders missing from translation: {}", missing.join(", "))]
pub struct PlaceholderMismatch {
    pub missing: Vec<String>,
}

/// Errors that end a job without producing output.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("{0}")]
    OutOfRange(#[from] CueError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            JobError::Format(_) => Some(ErrorKind::Format),
            JobError::Auth(_) => Some(ErrorKind::Auth),
            JobError::OutOfRange(_) => Some(ErrorKind::OutOfRange),
            JobError::Config(_) | JobError::Io(_) => None,
        }
    }
}
