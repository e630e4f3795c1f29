//! OpenAI-compatible embedding client.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{check_dimension, Embedder, EmbeddingIntent};
use crate::error::EmbeddingError;
use crate::http::{self, ApiKeyHeader};

/// Default OpenAI API root.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Talks to `/embeddings` on OpenAI or any server speaking the same protocol.
///
/// The protocol has no notion of intent, so it is expressed by prefixing the
/// input (`search_document: ` / `search_query: ` for nomic-style models).
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
    document_prefix: String,
    query_prefix: String,
}

impl OpenAiEmbedder {
    /// Builds a new embeddings client.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        if model.trim().is_empty() {
            return Err(EmbeddingError::Config("missing OpenAI model name".into()));
        }
        if dimension == 0 {
            return Err(EmbeddingError::Config("dimension must be positive".into()));
        }
        let client = http::json_client(api_key, ApiKeyHeader::Bearer, timeout)
            .map_err(EmbeddingError::Config)?;
        Ok(Self {
            client,
            endpoint: http::endpoint(base_url, "embeddings"),
            model: model.trim().to_string(),
            dimension,
            document_prefix: String::new(),
            query_prefix: String::new(),
        })
    }

    /// Sets the strings prepended to document and query inputs.
    pub fn with_prefixes(mut self, document: impl Into<String>, query: impl Into<String>) -> Self {
        self.document_prefix = document.into();
        self.query_prefix = query.into();
        self
    }

    fn input(&self, text: &str, intent: EmbeddingIntent) -> String {
        let prefix = match intent {
            EmbeddingIntent::Document => &self.document_prefix,
            EmbeddingIntent::Query => &self.query_prefix,
        };
        format!("{prefix}{text}")
    }
}

impl Embedder for OpenAiEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(
        &self,
        text: &str,
        intent: EmbeddingIntent,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let input = self.input(text, intent);
        let request = EmbeddingRequest {
            model: &self.model,
            input: [input.as_str()],
            dimensions: self.dimension,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
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
        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::Decode(err.to_string()))?;
        parsed.data.sort_by_key(|entry| entry.index);
        let Some(first) = parsed.data.into_iter().next() else {
            return Err(EmbeddingError::Decode("response contained no embeddings".into()));
        };
        check_dimension(self.dimension, first.embedding)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}
