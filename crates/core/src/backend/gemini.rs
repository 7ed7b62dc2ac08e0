//! Gemini-backed translator implementation.
//! This asks the chat model for a JSON object so lines map back one to one.

use super::{classify_status, fetch, Backend, BackendLimits, BackendResult};
use crate::error::BackendError;
use crate::language;
use crate::translate::batcher::Batch;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, trace};

pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Instruction used when no template is configured.
pub const DEFAULT_PROMPT_TEMPLATE: &str =
    "Translate the following subtitle entries from {source_language} to {target_language}. \
     Keep the meaning and tone of the original.";

/// Translator that delegates to the Gemini `generateContent` API.
pub struct GeminiBackend {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    template: String,
    tone: Option<String>,
}

impl GeminiBackend {
    pub fn new(client: Client, endpoint: String, api_key: String, model: String) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            model,
            template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            tone: None,
        }
    }

    /// Replace the instruction text and set the desired tone. Blank values
    /// keep the defaults.
    pub fn with_prompt(mut self, template: Option<String>, tone: Option<String>) -> Self {
        if let Some(template) = template.filter(|t| !t.trim().is_empty()) {
            self.template = template;
        }
        self.tone = tone.filter(|t| !t.trim().is_empty());
        self
    }

    /// Send a JSON body to the generate endpoint and return the JSON response.
    async fn post_generate(&self, body: Value) -> Result<Value, BackendError> {
        let request = self
            .client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.endpoint, self.model
            ))
            .header("x-goog-api-key", &self.api_key)
            .json(&body);
        let (status, text) = fetch(request).await?;
        if !status.is_success() {
            return Err(classify_gemini_status(status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| BackendError::Provider(format!("invalid Gemini response: {e}")))
    }
}

/// Fill the instruction template. `{LANG}` is an alias for the target
/// language; a tone the template does not mention is appended.
fn render_instruction(template: &str, batch: &Batch, tone: Option<&str>) -> String {
    let target = language::display_name(&batch.target_lang);
    let mut text = template
        .replace("{source_language}", &language::display_name(&batch.source_lang))
        .replace("{target_language}", &target)
        .replace("{LANG}", &target)
        .replace("{TONE}", tone.unwrap_or(""));
    if let Some(tone) = tone {
        if !template.contains("{TONE}") {
            text.push_str(&format!(" Use a {tone} tone."));
        }
    }
    text
}

/// Build the translation prompt with numbered entries.
/// Entries may span lines, so numbering rather than line breaks delimits them.
/// The answer format is fixed whatever the template says, since the reply
/// is parsed as JSON.
fn build_prompt(batch: &Batch, template: &str, tone: Option<&str>) -> String {
    let mut entries = String::new();
    for (i, text) in batch.texts().iter().enumerate() {
        entries.push_str(&format!("{}. {}\n", i + 1, text));
    }
    format!(
        "{instruction}\n\nThere are {count} entries. \
         Return a JSON object with key 'lines' holding exactly {count} strings, one per entry, in order. \
         Keep line breaks inside an entry as \\n. Copy tokens like {{0}} unchanged into the position where \
         they belong in the translation. Do not add explanations.\n\nEntries:\n{entries}",
        instruction = render_instruction(template, batch, tone),
        count = batch.units.len(),
    )
}

/// Extract the `lines` array from the model's answer.
fn parse_lines(value: &Value) -> Result<Vec<String>, BackendError> {
    let candidate = &value["candidates"][0];
    if let Some(reason) = candidate["finishReason"].as_str() {
        if reason != "STOP" && reason != "MAX_TOKENS" {
            return Err(BackendError::Provider(format!("generation stopped: {reason}")));
        }
    }
    let content = candidate["content"]["parts"][0]["text"]
        .as_str()
        .ok_or_else(|| BackendError::Provider("missing content".into()))?;
    let data: Value = serde_json::from_str(content)
        .map_err(|e| BackendError::Provider(format!("model did not return JSON: {e}")))?;
    let arr = data["lines"]
        .as_array()
        .ok_or_else(|| BackendError::Provider("no lines".into()))?;
    Ok(arr
        .iter()
        .map(|v| v.as_str().unwrap_or("").to_string())
        .collect())
}

/// Gemini rejects bad keys with 400 `API_KEY_INVALID` and throttles with
/// `RESOURCE_EXHAUSTED`.
fn classify_gemini_status(status: StatusCode, body: &str) -> BackendError {
    let message = format!("{status}: {}", body.trim());
    if body.contains("API_KEY_INVALID") {
        return BackendError::Auth(message);
    }
    if body.contains("RESOURCE_EXHAUSTED") {
        return BackendError::RateLimit(message);
    }
    classify_status(status, body)
}

#[async_trait]
impl Backend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn limits(&self) -> BackendLimits {
        BackendLimits {
            max_batch_chars: 12_000,
            max_batch_items: 100,
            requests_per_second: Some(1.0),
        }
    }

    /// Translate a batch of entries in one generation call.
    async fn translate(&self, batch: &Batch) -> Result<BackendResult, BackendError> {
        trace!("gemini translate batch={} units={}", batch.id, batch.units.len());
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": build_prompt(batch, &self.template, self.tone.as_deref())}]}],
            "generationConfig": {"responseMimeType": "application/json"},
        });
        let value = self.post_generate(body).await?;
        let lines = parse_lines(&value)?;
        if let Some(usage) = value.get("usageMetadata") {
            debug!(
                "gemini batch {} used {} tokens",
                batch.id,
                usage["totalTokenCount"].as_u64().unwrap_or(0)
            );
        }
        BackendResult::from_translations(batch, lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::batch_of;
    use httpmock::prelude::*;

    fn answer(lines: Value) -> Value {
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": json!({"lines": lines}).to_string()}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"totalTokenCount": 42}
        })
    }

    #[test]
    fn prompt_numbers_entries_and_names_languages() {
        let batch = batch_of(&["Hello", "Two\nlines"], "eng_Latn", "fra_Latn");
        let prompt = build_prompt(&batch, DEFAULT_PROMPT_TEMPLATE, None);
        assert!(prompt.contains("from English to French"));
        assert!(prompt.contains("exactly 2 strings"));
        assert!(prompt.contains("1. Hello\n2. Two\nlines\n"));
        assert!(prompt.contains("tokens like {0}"));
        assert!(!prompt.contains("tone."));
    }

    /// A custom template replaces the instruction but not the answer format.
    #[test]
    fn custom_template_and_tone() {
        let batch = batch_of(&["Hello {0}there{1}"], "eng_Latn", "deu_Latn");
        let prompt = build_prompt(
            &batch,
            "Render this {source_language} dialogue in {LANG}, keeping it {TONE}.",
            Some("informal"),
        );
        assert!(prompt.starts_with("Render this English dialogue in German, keeping it informal."));
        assert!(prompt.contains("exactly 1 strings"));
        assert!(prompt.contains("1. Hello {0}there{1}\n"));

        let appended = build_prompt(&batch, DEFAULT_PROMPT_TEMPLATE, Some("formal"));
        assert!(appended.contains("Use a formal tone."));
    }

    #[test]
    fn blank_prompt_settings_keep_defaults() {
        let backend = GeminiBackend::new(Client::new(), "http://x".into(), "k".into(), "m".into())
            .with_prompt(Some("  ".into()), Some("".into()));
        assert_eq!(backend.template, DEFAULT_PROMPT_TEMPLATE);
        assert_eq!(backend.tone, None);
    }

    /// The key goes in the header and the JSON `lines` are mapped in order.
    #[tokio::test]
    async fn translates_batch() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1beta/models/gemini-test:generateContent")
                    .header("x-goog-api-key", "g-key");
                then.status(200)
                    .json_body(answer(json!(["Bonjour {0}monde{1}", "Au revoir"])));
            })
            .await;
        let backend = GeminiBackend::new(
            Client::new(),
            server.base_url(),
            "g-key".into(),
            "gemini-test".into(),
        );
        let batch = batch_of(&["Hello {0}world{1}", "Goodbye"], "en", "fr");
        let result = backend.translate(&batch).await.unwrap();
        mock.assert_async().await;
        assert_eq!(
            result.per_unit[0].result,
            Ok("Bonjour {0}monde{1}".to_string())
        );
        assert_eq!(result.per_unit[1].result, Ok("Au revoir".to_string()));
    }

    #[test]
    fn rejects_blocked_or_malformed_answers() {
        let blocked = json!({"candidates": [{"finishReason": "SAFETY"}]});
        assert!(matches!(parse_lines(&blocked), Err(BackendError::Provider(_))));
        let prose = json!({"candidates": [{"content": {"parts": [{"text": "Sure! Here you go"}]}}]});
        assert!(matches!(parse_lines(&prose), Err(BackendError::Provider(_))));
    }

    #[test]
    fn classifies_error_bodies() {
        let bad_key = r#"{"error":{"code":400,"status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#;
        assert!(matches!(
            classify_gemini_status(StatusCode::BAD_REQUEST, bad_key),
            BackendError::Auth(_)
        ));
        let quota = r#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(
            classify_gemini_status(StatusCode::TOO_MANY_REQUESTS, quota),
            BackendError::RateLimit(_)
        ));
        assert!(matches!(
            classify_gemini_status(StatusCode::INTERNAL_SERVER_ERROR, "oops"),
            BackendError::Provider(_)
        ));
    }
}
