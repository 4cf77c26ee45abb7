//! Adapts a text-completion [`LlmProvider`] into a structured [`ModelClient`].

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value as JsonValue;

use super::{
    ChatMessage, CompletionConfig, LlmProvider, ModelClient, ModelResponse, ProviderError,
    ResponseSchema,
};
use crate::prompts::schema_instruction;

lazy_static! {
    /// Fenced code block, optionally tagged `json`
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").unwrap();
}

/// Pull a JSON value out of completion text.
///
/// Tries, in order: the whole text, each fenced code block, then the span
/// from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> Result<JsonValue, ProviderError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    for caps in FENCED_BLOCK.captures_iter(trimmed) {
        if let Some(body) = caps.get(1) {
            if let Ok(value) = serde_json::from_str(body.as_str().trim()) {
                return Ok(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    let preview: String = trimmed.chars().take(80).collect();
    Err(ProviderError::ParseError(format!(
        "no JSON object found in completion: {preview}"
    )))
}

/// [`ModelClient`] over a text-completion provider.
///
/// Prepends a system turn describing the target schema and parses the
/// completion as JSON.
pub struct ProviderClient<P> {
    provider: P,
    config: CompletionConfig,
}

impl<P: LlmProvider> ProviderClient<P> {
    pub fn new(provider: P, config: CompletionConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn build_messages(&self, messages: &[ChatMessage], schema: &ResponseSchema) -> Vec<ChatMessage> {
        let mut full = Vec::with_capacity(messages.len() + 1);
        full.push(ChatMessage::system(schema_instruction(schema)));
        full.extend_from_slice(messages);
        full
    }
}

#[async_trait]
impl<P: LlmProvider> ModelClient for ProviderClient<P> {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        schema: &ResponseSchema,
    ) -> Result<ModelResponse, ProviderError> {
        let request = self.build_messages(messages, schema);
        let completion = self.provider.complete(request, &self.config).await?;
        let content = extract_json(&completion.content)?;

        Ok(ModelResponse {
            content,
            usage: completion.usage,
            model: completion.model,
        })
    }

    fn name(&self) -> &str {
        self.provider.name()
    }
}
