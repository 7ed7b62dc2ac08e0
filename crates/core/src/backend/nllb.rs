//! Self-hosted NLLB translation server backend.
//! The server takes FLORES language tags and a list of source strings.

use super::{send, Backend, BackendLimits, BackendResult};
use crate::error::BackendError;
use crate::translate::batcher::Batch;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::trace;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:6060/translate";

/// Backend that posts batches to a local NLLB server.
pub struct NllbBackend {
    client: Client,
    endpoint: String,
}

impl NllbBackend {
    pub fn new(client: Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl Backend for NllbBackend {
    fn name(&self) -> &'static str {
        "nllb"
    }

    fn limits(&self) -> BackendLimits {
        BackendLimits {
            max_batch_chars: 4_000,
            max_batch_items: 32,
            requests_per_second: None,
        }
    }

    async fn translate(&self, batch: &Batch) -> Result<BackendResult, BackendError> {
        trace!("nllb translate batch={} units={}", batch.id, batch.units.len());
        let body = json!({
            "source": batch.texts(),
            "src_lang": batch.source_lang,
            "tgt_lang": batch.target_lang,
        });
        let text = send(self.client.post(&self.endpoint).json(&body)).await?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| BackendError::Provider(format!("invalid JSON from server: {e}")))?;
        BackendResult::from_translations(batch, parse_translations(value)?)
    }
}

/// Accept the response shapes NLLB servers produce: a bare string, a list of
/// strings, or an object with a `translation` string or list.
fn parse_translations(value: Value) -> Result<Vec<String>, BackendError> {
    match value {
        Value::String(s) => Ok(vec![s]),
        Value::Array(items) => strings(items),
        Value::Object(mut map) => match map.remove("translation") {
            Some(Value::String(s)) => Ok(vec![s]),
            Some(Value::Array(items)) => strings(items),
            _ => Err(BackendError::Provider(format!(
                "unexpected response format: {}",
                Value::Object(map)
            ))),
        },
        other => Err(BackendError::Provider(format!(
            "unexpected response format: {other}"
        ))),
    }
}

fn strings(items: Vec<Value>) -> Result<Vec<String>, BackendError> {
    items
        .into_iter()
        .map(|v| match v {
            Value::String(s) => Ok(s),
            other => Err(BackendError::Provider(format!(
                "non-string translation: {other}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::batch_of;
    use crate::error::ErrorKind;
    use httpmock::prelude::*;

    fn backend(server: &MockServer) -> NllbBackend {
        NllbBackend::new(Client::new(), server.url("/translate"))
    }

    /// Sends source lines with FLORES tags and reads the `translation` list.
    #[tokio::test]
    async fn translates_batch() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/translate").json_body(json!({
                    "source": ["Hello", "Bye"],
                    "src_lang": "eng_Latn",
                    "tgt_lang": "nld_Latn"
                }));
                then.status(200)
                    .json_body(json!({"translation": ["Hallo", "Doei"]}));
            })
            .await;
        let batch = batch_of(&["Hello", "Bye"], "eng_Latn", "nld_Latn");
        let result = backend(&server).translate(&batch).await.unwrap();
        mock.assert_async().await;
        assert_eq!(result.per_unit[0].result, Ok("Hallo".to_string()));
        assert_eq!(result.per_unit[1].result, Ok("Doei".to_string()));
    }

    #[test]
    fn accepts_alternative_shapes() {
        assert_eq!(parse_translations(json!("Hallo")).unwrap(), vec!["Hallo"]);
        assert_eq!(
            parse_translations(json!(["a", "b"])).unwrap(),
            vec!["a", "b"]
        );
        assert_eq!(
            parse_translations(json!({"translation": "x"})).unwrap(),
            vec!["x"]
        );
        assert!(parse_translations(json!({"result": []})).is_err());
        assert!(parse_translations(json!([1, 2])).is_err());
    }

    /// A truncated answer is surfaced per unit, never silently dropped.
    #[tokio::test]
    async fn short_answer_becomes_unit_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/translate");
                then.status(200).json_body(json!(["Hallo"]));
            })
            .await;
        let batch = batch_of(&["Hello", "Bye"], "eng_Latn", "nld_Latn");
        let result = backend(&server).translate(&batch).await.unwrap();
        assert_eq!(
            result.per_unit[1].result.as_ref().unwrap_err().kind,
            ErrorKind::Provider
        );
    }

    #[tokio::test]
    async fn server_errors_are_classified() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/translate");
                then.status(503).body("model loading");
            })
            .await;
        let batch = batch_of(&["Hello"], "eng_Latn", "nld_Latn");
        let err = backend(&server).translate(&batch).await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Transient("503 Service Unavailable: model loading".into())
        );
    }

    /// Nothing listening on the port is a retryable fault.
    #[tokio::test]
    async fn connection_refused_is_transient() {
        let backend = NllbBackend::new(Client::new(), "http://127.0.0.1:9/translate".into());
        let batch = batch_of(&["Hello"], "eng_Latn", "nld_Latn");
        let err = backend.translate(&batch).await.unwrap_err();
        assert!(matches!(err, BackendError::Transient(_)));
    }
}
