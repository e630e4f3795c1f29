//! Command-line and environment configuration shared by the binaries.
//!
//! Each group is a `clap::Args` struct that binaries flatten into their own
//! parser, then turn into runtime values with the `build_*` methods.

use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::chunker::{ChunkerConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::embedder::{
    AnyEmbedder, GeminiEmbedder, OpenAiEmbedder, DEFAULT_DIMENSION, DEFAULT_GEMINI_BASE_URL,
    DEFAULT_GEMINI_EMBEDDING_MODEL, DEFAULT_OPENAI_BASE_URL,
};
use crate::error::{EmbeddingError, GenerationError, StorageError};
use crate::generator::{
    AnyGenerator, GeminiGenerator, GenerationSettings, OpenAiGenerator,
    DEFAULT_GEMINI_GENERATION_MODEL, DEFAULT_OPENAI_CHAT_MODEL,
};
use crate::pipeline::{PipelineConfig, RetryPolicy};
use crate::store::{PgStore, DEFAULT_MIN_SIMILARITY, DEFAULT_SEARCH_LIMIT};

const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Remote model vendor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// Google Generative Language API.
    Gemini,
    /// OpenAI or a compatible server.
    Openai,
}

/// API keys, shared by the embedding and generation clients.
#[derive(Args, Debug, Clone, Default)]
pub struct CredentialArgs {
    /// API key for Gemini models
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    /// API key for OpenAI-compatible endpoints
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,
}

impl CredentialArgs {
    fn key_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Gemini => self.google_api_key.as_deref(),
            Provider::Openai => self.openai_api_key.as_deref(),
        }
    }
}

/// Embedding client settings.
#[derive(Args, Debug, Clone)]
pub struct EmbeddingArgs {
    /// Embedding vendor
    #[arg(
        long,
        env = "PAGECITE_EMBEDDING_PROVIDER",
        value_enum,
        default_value = "gemini"
    )]
    pub embedding_provider: Provider,

    /// Embedding model (defaults to the provider's recommended model)
    #[arg(long, env = "PAGECITE_EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    /// Override the provider's API root
    #[arg(long, env = "PAGECITE_EMBEDDING_BASE_URL")]
    pub embedding_base_url: Option<String>,

    /// Vector length requested from the model and enforced by the store
    #[arg(long, env = "PAGECITE_EMBEDDING_DIMENSION", default_value_t = DEFAULT_DIMENSION)]
    pub embedding_dimension: usize,

    /// Seconds before an embedding request times out
    #[arg(long, env = "PAGECITE_EMBEDDING_TIMEOUT_SECS", default_value_t = 30)]
    pub embedding_timeout_secs: u64,

    /// Prefix prepended to document text (OpenAI-compatible provider only)
    #[arg(long, env = "PAGECITE_DOCUMENT_PREFIX", default_value = "")]
    pub document_prefix: String,

    /// Prefix prepended to queries (OpenAI-compatible provider only)
    #[arg(long, env = "PAGECITE_QUERY_PREFIX", default_value = "")]
    pub query_prefix: String,
}

impl EmbeddingArgs {
    /// Builds the selected embedding client.
    pub fn build_embedder(
        &self,
        credentials: &CredentialArgs,
    ) -> Result<AnyEmbedder, EmbeddingError> {
        let provider = self.embedding_provider;
        let key = credentials.key_for(provider).ok_or_else(|| {
            EmbeddingError::Config(format!("no API key configured for {provider:?}"))
        })?;
        let timeout = Duration::from_secs(self.embedding_timeout_secs);
        match provider {
            Provider::Gemini => GeminiEmbedder::new(
                key,
                self.embedding_base_url
                    .as_deref()
                    .unwrap_or(DEFAULT_GEMINI_BASE_URL),
                self.embedding_model
                    .as_deref()
                    .unwrap_or(DEFAULT_GEMINI_EMBEDDING_MODEL),
                self.embedding_dimension,
                timeout,
            )
            .map(AnyEmbedder::Gemini),
            Provider::Openai => OpenAiEmbedder::new(
                key,
                self.embedding_base_url
                    .as_deref()
                    .unwrap_or(DEFAULT_OPENAI_BASE_URL),
                self.embedding_model
                    .as_deref()
                    .unwrap_or(DEFAULT_OPENAI_EMBEDDING_MODEL),
                self.embedding_dimension,
                timeout,
            )
            .map(|embedder| {
                AnyEmbedder::OpenAi(
                    embedder.with_prefixes(self.document_prefix.clone(), self.query_prefix.clone()),
                )
            }),
        }
    }
}

/// Generation client settings.
#[derive(Args, Debug, Clone)]
pub struct GenerationArgs {
    /// Generation vendor
    #[arg(
        long,
        env = "PAGECITE_GENERATION_PROVIDER",
        value_enum,
        default_value = "gemini"
    )]
    pub generation_provider: Provider,

    /// Chat model (defaults to the provider's recommended model)
    #[arg(long, env = "PAGECITE_GENERATION_MODEL")]
    pub generation_model: Option<String>,

    /// Override the provider's API root
    #[arg(long, env = "PAGECITE_GENERATION_BASE_URL")]
    pub generation_base_url: Option<String>,

    /// Sampling temperature
    #[arg(long, env = "PAGECITE_TEMPERATURE", default_value_t = 0.2)]
    pub temperature: f32,

    /// Upper bound on generated tokens (unset = model default; thinking models
    /// spend part of this budget before answering)
    #[arg(long, env = "PAGECITE_MAX_OUTPUT_TOKENS")]
    pub max_output_tokens: Option<u32>,

    /// Seconds before a generation request times out
    #[arg(long, env = "PAGECITE_GENERATION_TIMEOUT_SECS", default_value_t = 60)]
    pub generation_timeout_secs: u64,
}

impl GenerationArgs {
    /// Builds the selected generation client.
    pub fn build_generator(
        &self,
        credentials: &CredentialArgs,
    ) -> Result<AnyGenerator, GenerationError> {
        let provider = self.generation_provider;
        let key = credentials.key_for(provider).ok_or_else(|| {
            GenerationError::Config(format!("no API key configured for {provider:?}"))
        })?;
        let settings = GenerationSettings {
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        };
        let timeout = Duration::from_secs(self.generation_timeout_secs);
        match provider {
            Provider::Gemini => GeminiGenerator::new(
                key,
                self.generation_base_url
                    .as_deref()
                    .unwrap_or(DEFAULT_GEMINI_BASE_URL),
                self.generation_model
                    .as_deref()
                    .unwrap_or(DEFAULT_GEMINI_GENERATION_MODEL),
                settings,
                timeout,
            )
            .map(AnyGenerator::Gemini),
            Provider::Openai => OpenAiGenerator::new(
                key,
                self.generation_base_url
                    .as_deref()
                    .unwrap_or(DEFAULT_OPENAI_BASE_URL),
                self.generation_model
                    .as_deref()
                    .unwrap_or(DEFAULT_OPENAI_CHAT_MODEL),
                settings,
                timeout,
            )
            .map(AnyGenerator::OpenAi),
        }
    }
}

/// Chunking, retrieval and call-budget settings.
#[derive(Args, Debug, Clone)]
pub struct RetrievalArgs {
    /// Maximum chunks retrieved per question
    #[arg(long, env = "PAGECITE_TOP_K", default_value_t = DEFAULT_SEARCH_LIMIT)]
    pub top_k: usize,

    /// Similarity floor; weaker chunks are never retrieved
    #[arg(long, env = "PAGECITE_MIN_SIMILARITY", default_value_t = DEFAULT_MIN_SIMILARITY)]
    pub min_similarity: f32,

    /// Chunk window in characters
    #[arg(long, env = "PAGECITE_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Characters repeated between adjacent chunks
    #[arg(long, env = "PAGECITE_CHUNK_OVERLAP", default_value_t = DEFAULT_CHUNK_OVERLAP)]
    pub chunk_overlap: usize,

    /// Seconds allowed per embedding or generation call (unset = no deadline)
    #[arg(long, env = "PAGECITE_CALL_DEADLINE_SECS")]
    pub call_deadline_secs: Option<u64>,

    /// Attempts per chunk embedding during ingestion (1 = no retries)
    #[arg(long, env = "PAGECITE_INGEST_ATTEMPTS", default_value_t = 1)]
    pub ingest_attempts: usize,

    /// Milliseconds before the first ingestion retry
    #[arg(long, env = "PAGECITE_RETRY_BASE_MS", default_value_t = 500)]
    pub retry_base_ms: u64,
}

impl RetrievalArgs {
    /// Converts the parsed flags into a [`PipelineConfig`].
    pub fn build_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            chunker: ChunkerConfig {
                chunk_size: self.chunk_size,
                overlap: self.chunk_overlap,
            },
            top_k: self.top_k,
            min_similarity: self.min_similarity,
            deadline: self.call_deadline_secs.map(Duration::from_secs),
            retry: RetryPolicy {
                max_attempts: self.ingest_attempts.max(1),
                base_delay: Duration::from_millis(self.retry_base_ms),
            },
        }
    }
}

/// Postgres connection settings.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Postgres connection string (postgres://...)
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Schema holding the documents and chunk tables
    #[arg(long, env = "PAGECITE_SCHEMA", default_value = "public")]
    pub schema: String,

    /// Create the extension, tables and indexes on start-up
    #[arg(long, env = "PAGECITE_PREPARE_SCHEMA", default_value_t = false)]
    pub prepare_schema: bool,
}

impl StoreArgs {
    /// Connects to Postgres, preparing the schema when requested.
    pub async fn connect(&self, dimension: usize) -> Result<PgStore, StorageError> {
        let url = self
            .database_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| StorageError::Config("DATABASE_URL is not set".into()))?;
        let store = PgStore::connect(url, &self.schema, dimension).await?;
        if self.prepare_schema {
            store.prepare().await?;
        }
        Ok(store)
    }
}
