//! Machine translation of extracted texts.
//!
//! Providers:
//!
//! - **[`OpenAiTranslator`]**: calls the OpenAI chat completions API with
//!   retry and backoff. Requires `OPENAI_API_KEY`.
//! - **[`EchoTranslator`]**: returns the input unchanged. Used when
//!   translation is disabled or no API key is available, so the pipeline
//!   degrades instead of failing.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (other) → fail immediately
//! - Network errors → retry
//!
//! Backoff is exponential: 1s, 2s, 4s, ... capped at 32s.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::TranslationConfig;
use crate::error::RegwatchError;
use crate::models::{DocumentText, NewDocumentText};
use crate::snippet::shorten;
use crate::store::Store;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const SUMMARY_WIDTH: usize = 400;
const SYSTEM_PROMPT: &str = "You are a financial regulatory translation assistant.";

#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, RegwatchError>;
}

pub struct EchoTranslator;

#[async_trait]
impl Translator for EchoTranslator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn translate(
        &self,
        text: &str,
        _source_lang: &str,
        _target_lang: &str,
    ) -> Result<String, RegwatchError> {
        Ok(text.to_string())
    }
}

pub struct OpenAiTranslator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    max_retries: u32,
    max_input_chars: usize,
}

impl OpenAiTranslator {
    pub fn new(config: &TranslationConfig, api_key: String) -> Result<Self, RegwatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RegwatchError::Translation(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            max_retries: config.max_retries,
            max_input_chars: config.max_input_chars,
        })
    }

    fn request_body(&self, text: &str, source_lang: &str, target_lang: &str) -> serde_json::Value {
        let input: String = text.chars().take(self.max_input_chars).collect();
        let prompt = format!(
            "Translate the following {} regulatory text into {}.\n\
             Preserve technical and regulatory terms as much as possible.\n\n\
             Text:\n{}",
            source_lang, target_lang, input
        );
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": 0.2,
        })
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, RegwatchError> {
        let body = self.request_body(text, source_lang, target_lang);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(OPENAI_CHAT_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| RegwatchError::Translation(e.to_string()))?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = RegwatchError::Translation(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    ));
                    if status.as_u16() == 429 || status.is_server_error() {
                        warn!(%status, attempt, "translation request throttled or failed, retrying");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(RegwatchError::Translation(e.to_string()));
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| RegwatchError::Translation("failed after retries".to_string())))
    }
}

/// Pull `choices[0].message.content` out of a chat completion.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, RegwatchError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .ok_or_else(|| {
            RegwatchError::Translation("invalid response: missing choices[0].message.content".into())
        })
}

/// Build the translator for `config`. A missing API key degrades to
/// [`EchoTranslator`] with a warning.
pub fn create_translator(config: &TranslationConfig) -> Result<Arc<dyn Translator>, RegwatchError> {
    match config.provider.as_str() {
        "openai" => match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => {
                Ok(Arc::new(OpenAiTranslator::new(config, key)?))
            }
            _ => {
                warn!("OPENAI_API_KEY not set, translations will echo the original text");
                Ok(Arc::new(EchoTranslator))
            }
        },
        "disabled" => Ok(Arc::new(EchoTranslator)),
        other => Err(RegwatchError::Translation(format!(
            "unknown translation provider: {}",
            other
        ))),
    }
}

/// Translate an original text row and persist the result as a derived,
/// non-original text with a short summary.
pub async fn create_translation(
    translator: &dyn Translator,
    store: &dyn Store,
    original: &DocumentText,
    source_lang: &str,
    target_lang: &str,
) -> Result<DocumentText, RegwatchError> {
    info!(
        text_id = original.id,
        document_id = original.document_id,
        provider = translator.name(),
        "translating {} -> {}",
        source_lang,
        target_lang
    );
    let translated = translator
        .translate(&original.full_text, source_lang, target_lang)
        .await?;
    let summary = shorten(&translated, SUMMARY_WIDTH);

    let row = store
        .save_text(NewDocumentText {
            document_id: original.document_id,
            language: target_lang.to_string(),
            is_original: false,
            full_text: translated,
            summary: Some(summary),
        })
        .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn parses_chat_completion() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Loan exposure  " } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "Loan exposure");
        assert!(parse_chat_response(&serde_json::json!({ "choices": [] })).is_err());
    }

    #[test]
    fn request_truncates_input() {
        let config = TranslationConfig {
            max_input_chars: 5,
            ..TranslationConfig::default()
        };
        let translator = OpenAiTranslator::new(&config, "sk-test".into()).unwrap();
        let body = translator.request_body("prêt bancaire", "FR", "EN");
        let prompt = body.pointer("/messages/1/content").and_then(|c| c.as_str()).unwrap();
        assert!(prompt.ends_with("Text:\nprêt "));
        assert!(prompt.starts_with("Translate the following FR regulatory text into EN."));
        assert_eq!(body["temperature"], 0.2);
    }

    #[test]
    fn disabled_provider_echoes() {
        let translator = create_translator(&TranslationConfig::default()).unwrap();
        assert_eq!(translator.name(), "echo");
    }

    #[tokio::test]
    async fn translation_is_stored_as_derived_text() {
        let store = InMemoryStore::new();
        let original = store
            .save_text(NewDocumentText {
                document_id: 1,
                language: "FR".into(),
                is_original: true,
                full_text: "Exposition au risque de crédit".into(),
                summary: None,
            })
            .await
            .unwrap();

        let row = create_translation(&EchoTranslator, &store, &original, "FR", "EN")
            .await
            .unwrap();
        assert!(!row.is_original);
        assert_eq!(row.language, "EN");
        assert_eq!(row.summary.as_deref(), Some("Exposition au risque de crédit"));
        assert_eq!(store.document_texts(1, Some(false)).await.unwrap().len(), 1);
    }
}
