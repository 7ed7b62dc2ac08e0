//! Uniform interface over the translation providers.
//! Each provider lives in its own module and declares its batching limits.

use crate::config::{BackendType, Settings};
use crate::error::{BackendError, ErrorKind, JobError, UnitError};
use crate::translate::batcher::Batch;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub mod deepl;
pub mod gemini;
pub mod google;
pub mod hf;
pub mod nllb;

#[cfg(test)]
pub(crate) mod testing;

/// Provider constraints consumed by the batcher and dispatcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackendLimits {
    pub max_batch_chars: usize,
    pub max_batch_items: usize,
    /// `None` means the provider is not paced.
    pub requests_per_second: Option<f64>,
}

/// Translation of one unit, or why it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub unit_id: usize,
    pub result: Result<String, UnitError>,
}

/// Per-unit answer for one batch, aligned with the batch's units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendResult {
    pub batch_id: usize,
    pub per_unit: Vec<UnitOutcome>,
}

impl BackendResult {
    /// Pair provider translations with the batch's units in order.
    /// A short answer yields item errors for the missing tail; a long one
    /// fails the batch, since nothing tells which entries are spurious.
    pub fn from_translations(batch: &Batch, translations: Vec<String>) -> Result<Self, BackendError> {
        if translations.len() > batch.units.len() {
            return Err(BackendError::Provider(format!(
                "provider returned {} translations for {} entries",
                translations.len(),
                batch.units.len()
            )));
        }
        if translations.len() < batch.units.len() {
            debug!(
                "batch {}: provider returned {} of {} entries",
                batch.id,
                translations.len(),
                batch.units.len()
            );
        }
        let mut translations = translations.into_iter();
        let per_unit = batch
            .units
            .iter()
            .map(|unit| UnitOutcome {
                unit_id: unit.id(),
                result: translations.next().ok_or_else(|| {
                    UnitError::new(ErrorKind::Provider, "entry missing from provider response")
                }),
            })
            .collect();
        Ok(Self {
            batch_id: batch.id,
            per_unit,
        })
    }

    /// Whether length and order match the originating batch.
    pub fn is_aligned_with(&self, batch: &Batch) -> bool {
        self.batch_id == batch.id
            && self.per_unit.len() == batch.units.len()
            && self
                .per_unit
                .iter()
                .zip(&batch.units)
                .all(|(outcome, unit)| outcome.unit_id == unit.id())
    }
}

/// Translates batches against one provider.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    fn limits(&self) -> BackendLimits;

    /// Translate every unit of `batch`, keeping order and length.
    async fn translate(&self, batch: &Batch) -> Result<BackendResult, BackendError>;
}

/// Build the adapter selected by `settings.backend_type`.
/// This function should fail early when a cloud provider has no credential.
pub fn create_backend(settings: &Settings) -> Result<Arc<dyn Backend>, JobError> {
    let client = http_client(settings.timeout())?;
    let backend: Arc<dyn Backend> = match settings.backend_type {
        BackendType::Nllb => Arc::new(nllb::NllbBackend::new(
            client,
            settings.endpoint_or(nllb::DEFAULT_ENDPOINT),
        )),
        BackendType::Deepl => {
            let key = settings.require_api_key()?;
            let endpoint = settings
                .endpoint
                .clone()
                .unwrap_or_else(|| deepl::default_endpoint(&key).to_string());
            Arc::new(deepl::DeepLBackend::new(client, endpoint, key))
        }
        BackendType::Google => Arc::new(google::GoogleBackend::new(
            client,
            settings.endpoint_or(google::DEFAULT_ENDPOINT),
            settings.require_api_key()?,
        )),
        BackendType::Gemini => Arc::new(
            gemini::GeminiBackend::new(
                client,
                settings.endpoint_or(gemini::DEFAULT_ENDPOINT),
                settings.require_api_key()?,
                settings
                    .model
                    .clone()
                    .unwrap_or_else(|| gemini::DEFAULT_MODEL.to_string()),
            )
            .with_prompt(settings.prompt_template.clone(), settings.tone.clone()),
        ),
        BackendType::Hf => Arc::new(hf::HfBackend::new(
            client,
            &settings.endpoint_or(hf::DEFAULT_ENDPOINT),
            settings.require_api_key()?,
            settings.model.as_deref().unwrap_or(hf::DEFAULT_MODEL),
        )),
    };
    Ok(backend)
}

/// HTTP client with the per-call timeout applied.
fn http_client(timeout: Duration) -> Result<reqwest::Client, JobError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| JobError::Config(format!("cannot build http client: {e}")))
}

/// Map a non-success HTTP status to the error taxonomy.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> BackendError {
    let message = format!("{status}: {}", body.trim());
    match status.as_u16() {
        401 | 403 => BackendError::Auth(message),
        429 => BackendError::RateLimit(message),
        408 | 502 | 503 | 504 => BackendError::Transient(message),
        _ => BackendError::Provider(message),
    }
}

/// Map a transport failure to the error taxonomy.
pub(crate) fn classify_transport(err: reqwest::Error) -> BackendError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        BackendError::Transient(err.to_string())
    } else {
        BackendError::Provider(err.to_string())
    }
}

/// Send a prepared request and return its status with the body text.
pub(crate) async fn fetch(request: reqwest::RequestBuilder) -> Result<(StatusCode, String), BackendError> {
    let resp = request.send().await.map_err(classify_transport)?;
    let status = resp.status();
    let body = resp.text().await.map_err(classify_transport)?;
    Ok((status, body))
}

/// Like `fetch`, classifying any non-2xx answer with the generic mapping.
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<String, BackendError> {
    let (status, body) = fetch(request).await?;
    if !status.is_success() {
        return Err(classify_status(status, &body));
    }
    Ok(body)
}
