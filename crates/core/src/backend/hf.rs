//! Hugging Face Inference API backend running an NLLB model.
//! Language tags are sent as FLORES codes, which NLLB pipelines expect.

use super::{send, Backend, BackendLimits, BackendResult};
use crate::error::BackendError;
use crate::translate::batcher::Batch;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::trace;

pub const DEFAULT_ENDPOINT: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_MODEL: &str = "facebook/nllb-200-distilled-600M";

/// Backend posting batches to a hosted translation pipeline.
pub struct HfBackend {
    client: Client,
    url: String,
    api_key: String,
}

impl HfBackend {
    pub fn new(client: Client, endpoint: &str, api_key: String, model: &str) -> Self {
        Self {
            client,
            url: format!("{}/models/{}", endpoint.trim_end_matches('/'), model),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct Generated {
    translation_text: String,
}

/// The pipeline answers with one object per input, a single object when
/// given one input, or an `error` object while the model is unavailable.
#[derive(Deserialize)]
#[serde(untagged)]
enum HfResponse {
    Many(Vec<Generated>),
    One(Generated),
    Error { error: String },
}

fn parse_response(text: &str) -> Result<Vec<String>, BackendError> {
    let response: HfResponse = serde_json::from_str(text)
        .map_err(|e| BackendError::Provider(format!("unexpected Hugging Face response: {e}")))?;
    match response {
        HfResponse::Many(items) => Ok(items.into_iter().map(|g| g.translation_text).collect()),
        HfResponse::One(item) => Ok(vec![item.translation_text]),
        HfResponse::Error { error } => Err(BackendError::Provider(error)),
    }
}

#[async_trait]
impl Backend for HfBackend {
    fn name(&self) -> &'static str {
        "hf"
    }

    fn limits(&self) -> BackendLimits {
        BackendLimits {
            max_batch_chars: 2_000,
            max_batch_items: 8,
            requests_per_second: None,
        }
    }

    async fn translate(&self, batch: &Batch) -> Result<BackendResult, BackendError> {
        trace!("hf translate batch={} units={}", batch.id, batch.units.len());
        let body = json!({
            "inputs": {
                "text": batch.texts(),
                "src_lang": batch.source_lang,
                "tgt_lang": batch.target_lang,
            },
            "options": {"use_cache": true, "wait_for_model": true},
        });
        let request = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body);
        let text = send(request).await?;
        BackendResult::from_translations(batch, parse_response(&text)?)
    }
}
