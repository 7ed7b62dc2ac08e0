//! DeepL REST API backend.

use super::{classify_status, fetch, Backend, BackendLimits, BackendResult};
use crate::error::BackendError;
use crate::language;
use crate::translate::batcher::Batch;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::trace;

const PRO_ENDPOINT: &str = "https://api.deepl.com";
const FREE_ENDPOINT: &str = "https://api-free.deepl.com";

/// Free-plan keys end in `:fx` and must use the free host.
pub fn default_endpoint(api_key: &str) -> &'static str {
    if api_key.ends_with(":fx") {
        FREE_ENDPOINT
    } else {
        PRO_ENDPOINT
    }
}

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}

pub struct DeepLBackend {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl DeepLBackend {
    pub fn new(client: Client, endpoint: String, api_key: String) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl Backend for DeepLBackend {
    fn name(&self) -> &'static str {
        "deepl"
    }

    /// DeepL accepts at most 50 texts per request and 128 KiB of body.
    fn limits(&self) -> BackendLimits {
        BackendLimits {
            max_batch_chars: 30_000,
            max_batch_items: 50,
            requests_per_second: Some(5.0),
        }
    }

    async fn translate(&self, batch: &Batch) -> Result<BackendResult, BackendError> {
        trace!("deepl translate batch={} units={}", batch.id, batch.units.len());
        let body = json!({
            "text": batch.texts(),
            "source_lang": language::deepl_code(&batch.source_lang),
            "target_lang": language::deepl_code(&batch.target_lang),
            "preserve_formatting": true,
        });
        let request = self
            .client
            .post(format!("{}/v2/translate", self.endpoint))
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .json(&body);
        let (status, text) = fetch(request).await?;
        if !status.is_success() {
            return Err(classify_deepl_status(status, &text));
        }
        let parsed: DeepLResponse = serde_json::from_str(&text)
            .map_err(|e| BackendError::Provider(format!("invalid DeepL response: {e}")))?;
        BackendResult::from_translations(
            batch,
            parsed.translations.into_iter().map(|t| t.text).collect(),
        )
    }
}

/// DeepL reports an exhausted character quota with 456; waiting will not help.
fn classify_deepl_status(status: StatusCode, body: &str) -> BackendError {
    if status.as_u16() == 456 {
        return BackendError::Provider(format!("quota exceeded: {}", body.trim()));
    }
    classify_status(status, body)
}
