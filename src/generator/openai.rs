//! OpenAI-compatible chat completions client.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{GenerationSettings, Generator};
use crate::error::GenerationError;
use crate::http::{self, ApiKeyHeader};

/// Default chat model for OpenAI endpoints.
pub const DEFAULT_OPENAI_CHAT_MODEL: &str = "gpt-4o-mini";

/// Sends the whole prompt as a single user message.
#[derive(Clone)]
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    model: String,
    settings: GenerationSettings,
}

impl OpenAiGenerator {
    /// Builds a new chat client.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        settings: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        if model.trim().is_empty() {
            return Err(GenerationError::Config("missing OpenAI model name".into()));
        }
        let client = http::json_client(api_key, ApiKeyHeader::Bearer, timeout)
            .map_err(GenerationError::Config)?;
        Ok(Self {
            client,
            endpoint: http::endpoint(base_url, "chat/completions"),
            model: model.trim().to_string(),
            settings,
        })
    }

    fn request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_output_tokens,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        }
    }
}

impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request(prompt))
            .send()
            .await
            .map_err(GenerationError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: http::error_body(response).await,
            });
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|err| GenerationError::Decode(err.to_string()))?;
        if parsed
            .choices
            .first()
            .is_some_and(|choice| choice.finish_reason.as_deref() == Some("length"))
        {
            tracing::warn!(
                max_tokens = ?self.settings.max_output_tokens,
                "generation hit the output token cap; answer may be truncated"
            );
        }
        Ok(parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}
