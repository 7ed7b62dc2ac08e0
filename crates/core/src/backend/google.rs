//! Google Cloud Translation (v2 REST) backend.

use super::{classify_status, fetch, Backend, BackendLimits, BackendResult};
use crate::error::BackendError;
use crate::language;
use crate::translate::batcher::Batch;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::trace;

pub const DEFAULT_ENDPOINT: &str = "https://translation.googleapis.com";

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    data: GoogleData,
}

#[derive(Debug, Deserialize)]
struct GoogleData {
    translations: Vec<GoogleTranslation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleTranslation {
    translated_text: String,
}

pub struct GoogleBackend {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl GoogleBackend {
    pub fn new(client: Client, endpoint: String, api_key: String) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl Backend for GoogleBackend {
    fn name(&self) -> &'static str {
        "google"
    }

    fn limits(&self) -> BackendLimits {
        BackendLimits {
            max_batch_chars: 5_000,
            max_batch_items: 128,
            requests_per_second: Some(10.0),
        }
    }

    async fn translate(&self, batch: &Batch) -> Result<BackendResult, BackendError> {
        trace!("google translate batch={} units={}", batch.id, batch.units.len());
        let body = json!({
            "q": batch.texts(),
            "source": language::iso_code(&batch.source_lang),
            "target": language::iso_code(&batch.target_lang),
            "format": "text",
        });
        let request = self
            .client
            .post(format!("{}/language/translate/v2", self.endpoint))
            .query(&[("key", self.api_key.as_str())])
            .json(&body);
        let (status, text) = fetch(request).await?;
        if !status.is_success() {
            return Err(classify_google_status(status, &text));
        }
        let parsed: GoogleResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::Provider(format!("invalid Google response: {e}")))?;
        BackendResult::from_translations(
            batch,
            parsed
                .data
                .translations
                .into_iter()
                .map(|t| t.translated_text)
                .collect(),
        )
    }
}

/// Google signals quota throttling with 403 and an invalid key with 400, so
/// the `reason` fields of the error body decide before the status does.
fn classify_google_status(status: StatusCode, body: &str) -> BackendError {
    let reasons: Vec<String> = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["errors"].as_array().cloned())
        .unwrap_or_default()
        .iter()
        .filter_map(|e| e["reason"].as_str().map(str::to_string))
        .collect();
    let message = format!("{status}: {}", body.trim());
    if reasons.iter().any(|r| r.ends_with("imitExceeded")) {
        return BackendError::RateLimit(message);
    }
    if reasons.iter().any(|r| r == "keyInvalid") || body.contains("API key not valid") {
        return BackendError::Auth(message);
    }
    classify_status(status, body)
}
