//! Text embedding clients.
//!
//! Every client returns vectors of exactly [`Embedder::dimension`] components;
//! a service that answers with another length is an error, never truncated.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;

mod gemini;
mod openai;

pub use gemini::{GeminiEmbedder, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_EMBEDDING_MODEL};
pub use openai::{OpenAiEmbedder, DEFAULT_OPENAI_BASE_URL};

/// Default embedding dimension.
pub const DEFAULT_DIMENSION: usize = 768;

/// What an embedding will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingIntent {
    /// Chunk text being indexed.
    Document,
    /// A user question used to search the index.
    Query,
}

impl EmbeddingIntent {
    /// Gemini `taskType` value for this intent.
    pub fn task_type(self) -> &'static str {
        match self {
            Self::Document => "RETRIEVAL_DOCUMENT",
            Self::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// Turns text into a fixed-length vector.
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embeds `text` for the given intent.
    fn embed(
        &self,
        text: &str,
        intent: EmbeddingIntent,
    ) -> impl Future<Output = Result<Vec<f32>, EmbeddingError>> + Send;
}

/// Rejects vectors whose length differs from `expected`.
pub fn check_dimension(expected: usize, vector: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
    if vector.len() != expected {
        return Err(EmbeddingError::Dimension {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

/// Runtime-selected embedding provider.
pub enum AnyEmbedder {
    /// Google Generative Language API.
    Gemini(GeminiEmbedder),
    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAi(OpenAiEmbedder),
}

impl AnyEmbedder {
    /// Provider name for logs.
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Gemini(_) => "gemini",
            Self::OpenAi(_) => "openai",
        }
    }
}

impl Embedder for AnyEmbedder {
    fn dimension(&self) -> usize {
        match self {
            Self::Gemini(inner) => inner.dimension(),
            Self::OpenAi(inner) => inner.dimension(),
        }
    }

    async fn embed(
        &self,
        text: &str,
        intent: EmbeddingIntent,
    ) -> Result<Vec<f32>, EmbeddingError> {
        match self {
            Self::Gemini(inner) => inner.embed(text, intent).await,
            Self::OpenAi(inner) => inner.embed(text, intent).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_map_to_retrieval_task_types() {
        assert_eq!(EmbeddingIntent::Document.task_type(), "RETRIEVAL_DOCUMENT");
        assert_eq!(EmbeddingIntent::Query.task_type(), "RETRIEVAL_QUERY");
    }

    #[test]
    fn dimension_drift_is_an_error() {
        let err = check_dimension(768, vec![0.0; 1536]).unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::Dimension {
                expected: 768,
                actual: 1536
            }
        ));
        assert_eq!(check_dimension(2, vec![1.0, 2.0]).unwrap(), vec![1.0, 2.0]);
    }
}
