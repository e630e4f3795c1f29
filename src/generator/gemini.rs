//! Gemini `generateContent` client.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{GenerationSettings, Generator};
use crate::error::GenerationError;
use crate::http::{self, ApiKeyHeader};

/// Default chat model.
pub const DEFAULT_GEMINI_GENERATION_MODEL: &str = "gemini-2.5-flash";

/// Sends one user turn per call and joins the text parts of the first candidate.
#[derive(Clone)]
pub struct GeminiGenerator {
    client: Client,
    endpoint: String,
    settings: GenerationSettings,
}

impl GeminiGenerator {
    /// Builds a client for `model`.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        settings: GenerationSettings,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let model = model.trim().trim_start_matches("models/");
        if model.is_empty() {
            return Err(GenerationError::Config("missing Gemini model name".into()));
        }
        let client = http::json_client(api_key, ApiKeyHeader::Named("x-goog-api-key"), timeout)
            .map_err(GenerationError::Config)?;
        Ok(Self {
            client,
            endpoint: http::endpoint(base_url, &format!("models/{model}:generateContent")),
            settings,
        })
    }

    fn request<'a>(&self, prompt: &'a str) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_output_tokens,
            },
        }
    }
}

impl Generator for GeminiGenerator {
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
        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|err| GenerationError::Decode(err.to_string()))?;
        if parsed.finish_reason() == Some("MAX_TOKENS") {
            tracing::warn!(
                max_output_tokens = ?self.settings.max_output_tokens,
                "generation hit the output token cap; answer may be truncated"
            );
        }
        Ok(parsed.text())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateContentResponse {
    fn finish_reason(&self) -> Option<&str> {
        self.candidates
            .first()
            .and_then(|candidate| candidate.finish_reason.as_deref())
    }

    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wraps_prompt_in_one_user_turn() {
        let generator = GeminiGenerator::new(
            "key",
            "https://generativelanguage.googleapis.com/v1beta",
            DEFAULT_GEMINI_GENERATION_MODEL,
            GenerationSettings {
                temperature: 0.5,
                max_output_tokens: Some(256),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(generator
            .endpoint
            .ends_with("/models/gemini-2.5-flash:generateContent"));
        assert_eq!(
            serde_json::to_value(generator.request("why?")).unwrap(),
            json!({
                "contents": [{"role": "user", "parts": [{"text": "why?"}]}],
                "generationConfig": {"temperature": 0.5, "maxOutputTokens": 256}
            })
        );
    }

    #[test]
    fn default_settings_leave_the_token_cap_to_the_model() {
        let generator = GeminiGenerator::new(
            "key",
            "https://generativelanguage.googleapis.com/v1beta",
            DEFAULT_GEMINI_GENERATION_MODEL,
            GenerationSettings {
                temperature: 0.5,
                ..GenerationSettings::default()
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let body = serde_json::to_value(generator.request("why?")).unwrap();
        assert_eq!(body["generationConfig"], json!({"temperature": 0.5}));
    }

    #[test]
    fn truncated_candidates_report_their_finish_reason() {
        let parsed: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"parts": [{"text": "Paris is"}]},
                "finishReason": "MAX_TOKENS"
            }]
        }))
        .unwrap();
        assert_eq!(parsed.finish_reason(), Some("MAX_TOKENS"));
        assert_eq!(parsed.text(), "Paris is");

        let thought_only: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model"}, "finishReason": "MAX_TOKENS"}]
        }))
        .unwrap();
        assert_eq!(thought_only.text(), "");
    }

    #[test]
    fn text_parts_are_joined() {
        let parsed: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "Paris "}, {"text": "is the capital."}]}}]
        }))
        .unwrap();
        assert_eq!(parsed.text(), "Paris is the capital.");
    }

    #[test]
    fn missing_candidates_yield_empty_text() {
        let parsed: GenerateContentResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(parsed.text(), "");
        let blocked: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": [{"finishReason": "SAFETY"}]})).unwrap();
        assert_eq!(blocked.text(), "");
    }
}
