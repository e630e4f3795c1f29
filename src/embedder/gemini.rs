//! Gemini `embedContent` client.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{check_dimension, Embedder, EmbeddingIntent};
use crate::error::EmbeddingError;
use crate::http::{self, ApiKeyHeader};

/// Default Generative Language API root.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Default embedding model.
pub const DEFAULT_GEMINI_EMBEDDING_MODEL: &str = "gemini-embedding-001";

/// Embeds one text per request with task-typed retrieval intents.
#[derive(Clone)]
pub struct GeminiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl GeminiEmbedder {
    /// Builds a client for `model` returning `dimension`-length vectors.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let model = model.trim().trim_start_matches("models/");
        if model.is_empty() {
            return Err(EmbeddingError::Config("missing Gemini model name".into()));
        }
        if dimension == 0 {
            return Err(EmbeddingError::Config("dimension must be positive".into()));
        }
        let client = http::json_client(api_key, ApiKeyHeader::Named("x-goog-api-key"), timeout)
            .map_err(EmbeddingError::Config)?;
        let endpoint = http::endpoint(base_url, &format!("models/{model}:embedContent"));
        Ok(Self {
            client,
            endpoint,
            model: format!("models/{model}"),
            dimension,
        })
    }

    fn request<'a>(&'a self, text: &'a str, intent: EmbeddingIntent) -> EmbedContentRequest<'a> {
        EmbedContentRequest {
            model: &self.model,
            content: Content {
                parts: [Part { text }],
            },
            task_type: intent.task_type(),
            output_dimensionality: self.dimension,
        }
    }
}

impl Embedder for GeminiEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(
        &self,
        text: &str,
        intent: EmbeddingIntent,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request(text, intent))
            .send()
            .await
            .map_err(EmbeddingError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body: http::error_body(response).await,
            });
        }
        let parsed: EmbedContentResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::Decode(err.to_string()))?;
        check_dimension(self.dimension, parsed.embedding.values)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}
