//! Resolved job settings handed to the pipeline by a front-end.

use crate::error::JobError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Translation provider selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// Self-hosted NLLB model server.
    #[default]
    #[serde(alias = "local_nllb")]
    Nllb,
    Deepl,
    Google,
    Gemini,
    /// Hugging Face hosted inference.
    #[serde(alias = "huggingface")]
    Hf,
}

impl BackendType {
    /// Environment variable consulted when no API key is configured.
    pub fn api_key_env(self) -> Option<&'static str> {
        match self {
            BackendType::Nllb => None,
            BackendType::Deepl => Some("DEEPL_API_KEY"),
            BackendType::Google | BackendType::Gemini => Some("GOOGLE_API_KEY"),
            BackendType::Hf => Some("HF_API_KEY"),
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendType::Nllb => "nllb",
            BackendType::Deepl => "deepl",
            BackendType::Google => "google",
            BackendType::Gemini => "gemini",
            BackendType::Hf => "hf",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nllb" | "local_nllb" => Ok(BackendType::Nllb),
            "deepl" => Ok(BackendType::Deepl),
            "google" => Ok(BackendType::Google),
            "gemini" => Ok(BackendType::Gemini),
            "hf" | "huggingface" => Ok(BackendType::Hf),
            other => Err(format!(
                "unknown backend {other:?}, expected one of: nllb, deepl, google, gemini, hf"
            )),
        }
    }
}

/// Settings for one translation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend_type: BackendType,
    /// Provider URL; each backend has its own default.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Upper bound on units per request, on top of the backend's own limit.
    pub batch_size: Option<usize>,
    pub source_lang: String,
    pub target_lang: String,
    pub max_retries: u32,
    /// Number of batches in flight at once.
    pub concurrency: usize,
    /// Per-request timeout.
    pub timeout_secs: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Model name for the Gemini and Hugging Face backends.
    pub model: Option<String>,
    /// Instruction text for prompt-driven backends. May use
    /// `{source_language}`, `{target_language}` and `{TONE}`.
    pub prompt_template: Option<String>,
    /// Desired register of the translation, e.g. "formal".
    pub tone: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_type: BackendType::Nllb,
            endpoint: None,
            api_key: None,
            batch_size: None,
            source_lang: "eng_Latn".to_string(),
            target_lang: "nld_Latn".to_string(),
            max_retries: 3,
            concurrency: 2,
            timeout_secs: 300,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            model: None,
            prompt_template: None,
            tone: None,
        }
    }
}

impl Settings {
    /// Check values that would make a job impossible to run.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.concurrency == 0 {
            return Err(JobError::Config("concurrency must be at least 1".into()));
        }
        if self.source_lang.trim().is_empty() || self.target_lang.trim().is_empty() {
            return Err(JobError::Config("source and target language are required".into()));
        }
        if self.timeout_secs == 0 {
            return Err(JobError::Config("timeout must be at least one second".into()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn endpoint_or(&self, default: &str) -> String {
        self.endpoint.clone().unwrap_or_else(|| default.to_string())
    }

    /// The configured key, or the provider's environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                self.backend_type
                    .api_key_env()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.trim().is_empty())
            })
    }

    pub fn require_api_key(&self) -> Result<String, JobError> {
        self.resolve_api_key().ok_or_else(|| {
            let hint = self
                .backend_type
                .api_key_env()
                .map(|var| format!(" (or set {var})"))
                .unwrap_or_default();
            JobError::Config(format!(
                "backend {} requires an API key{hint}",
                self.backend_type
            ))
        })
    }
}
