//! Ingestion and query orchestration.
//!
//! Ingestion: chunk → embed (intent DOCUMENT) → store, one chunk at a time.
//! Query: embed (intent QUERY) → retrieve → compose.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use tracing::instrument;

use crate::answer::{Answer, AnswerComposer, QueryStage, RetrievalSet};
use crate::chunker::{Chunker, ChunkerConfig, PageText};
use crate::embedder::{Embedder, EmbeddingIntent};
use crate::error::{EmbeddingError, Error, ExtractionError, Result, StorageError};
use crate::generator::Generator;
use crate::pdf::{join_pages, PageExtractor};
use crate::store::{
    Document, DocumentId, DocumentStore, SearchRequest, VectorStore, DEFAULT_MIN_SIMILARITY,
    DEFAULT_SEARCH_LIMIT,
};

/// Retry schedule for ingestion embedding calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first. `1` disables retries.
    pub max_attempts: usize,
    /// Delay before the first retry; doubled per attempt, capped at 32x.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(500),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.base_delay.saturating_mul(1 << capped)
    }

    /// Rate limits, server errors, transport failures and timeouts are transient.
    pub fn is_transient(err: &EmbeddingError) -> bool {
        match err {
            EmbeddingError::Transport(_) | EmbeddingError::Timeout(_) => true,
            EmbeddingError::Status { status, .. } => *status == 429 || *status >= 500,
            EmbeddingError::Decode(_)
            | EmbeddingError::Dimension { .. }
            | EmbeddingError::Config(_) => false,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Runtime settings for a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    /// Chunk window and overlap.
    pub chunker: ChunkerConfig,
    /// Maximum chunks retrieved per question.
    pub top_k: usize,
    /// Chunks below this similarity are never retrieved.
    pub min_similarity: f32,
    /// Bound on each embedding and generation call.
    pub deadline: Option<Duration>,
    /// Retry schedule for ingestion embeddings.
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            top_k: DEFAULT_SEARCH_LIMIT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            deadline: None,
            retry: RetryPolicy::none(),
        }
    }
}

/// Summary of a finished ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Ingested document.
    pub document_id: DocumentId,
    /// Pages read.
    pub pages: usize,
    /// Chunks embedded and stored.
    pub chunks: usize,
}

/// Wires an embedder, a store, and a generator into the two workflows.
pub struct Pipeline<E, S, G> {
    embedder: E,
    store: S,
    composer: AnswerComposer<G>,
    chunker: Chunker,
    config: PipelineConfig,
}

impl<E, S, G> Pipeline<E, S, G>
where
    E: Embedder,
    S: DocumentStore + VectorStore,
    G: Generator,
{
    /// Builds a pipeline; the embedder and store must agree on the dimension.
    pub fn new(embedder: E, store: S, generator: G, config: PipelineConfig) -> Result<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(StorageError::Dimension {
                expected: store.dimension(),
                actual: embedder.dimension(),
            }
            .into());
        }
        Ok(Self {
            embedder,
            store,
            composer: AnswerComposer::new(generator, config.deadline),
            chunker: Chunker::new(config.chunker),
            config,
        })
    }

    /// Shared store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Embedding client.
    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Generation client.
    pub fn generator(&self) -> &G {
        self.composer.generator()
    }

    /// Effective settings.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Registers an uploaded file and returns its document id.
    pub async fn create_document(&self, filename: &str) -> Result<DocumentId> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(Error::invalid_input("filename must not be empty"));
        }
        Ok(self.store.create_document(filename).await?)
    }

    /// Looks a document up.
    pub async fn get_document(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.store.get_document(id).await?)
    }

    /// Deletes a document together with all of its chunks.
    #[instrument(skip(self))]
    pub async fn delete_document(&self, id: DocumentId) -> Result<()> {
        if !self.store.delete_document(id).await? {
            return Err(Error::invalid_input(format!("document {id} does not exist")));
        }
        tracing::info!("document deleted");
        Ok(())
    }

    /// Number of stored documents.
    pub async fn count_documents(&self) -> Result<u64> {
        Ok(self.store.count_documents().await?)
    }

    /// Chunks, embeds and stores `pages` for an existing document.
    ///
    /// Any failure after the first chunk is written purges the document's
    /// chunks, so a deleted document never regains rows.
    #[instrument(skip(self, pages), fields(pages = pages.len()))]
    pub async fn ingest(&self, document_id: DocumentId, pages: &[PageText]) -> Result<IngestReport> {
        if self.store.get_document(document_id).await?.is_none() {
            return Err(StorageError::MissingDocument(document_id).into());
        }
        let chunks = self.chunker.chunk_pages(pages);
        tracing::debug!(chunks = chunks.len(), "chunked document");

        let mut stored = 0usize;
        let outcome: Result<()> = async {
            for chunk in &chunks {
                let embedding = self
                    .embed_with_retry(&chunk.content, EmbeddingIntent::Document)
                    .await?;
                self.store
                    .store(document_id, &chunk.content, &embedding, &chunk.metadata)
                    .await?;
                stored += 1;
                tracing::debug!(
                    page = chunk.metadata.page_number,
                    chunk_index = chunk.metadata.chunk_index,
                    "stored chunk"
                );
            }
            self.store
                .set_document_content(document_id, &join_pages(pages))
                .await?;
            Ok(())
        }
        .await;

        if let Err(err) = outcome {
            if stored > 0 || matches!(err, Error::Storage(StorageError::MissingDocument(_))) {
                self.purge(document_id).await;
            }
            return Err(err);
        }
        tracing::info!(chunks = stored, "ingestion complete");
        Ok(IngestReport {
            document_id,
            pages: pages.len(),
            chunks: stored,
        })
    }

    /// Extracts `path` on a blocking thread, then runs [`Pipeline::ingest`].
    #[instrument(skip(self, path, extractor), fields(path = %path.display()))]
    pub async fn ingest_file<X>(
        &self,
        document_id: DocumentId,
        path: &Path,
        extractor: &X,
    ) -> Result<IngestReport>
    where
        X: PageExtractor + Clone + 'static,
    {
        let owned_path = path.to_path_buf();
        let extractor = extractor.clone();
        let pages = tokio::task::spawn_blocking(move || extractor.extract_pages(&owned_path))
            .await
            .map_err(|err| ExtractionError::Task(err.to_string()))??;
        self.ingest(document_id, &pages).await
    }

    /// Embeds the question and returns the ranked chunks above the floor.
    #[instrument(skip(self, question))]
    pub async fn retrieve(
        &self,
        question: &str,
        document_id: Option<DocumentId>,
    ) -> Result<RetrievalSet> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::invalid_input("question must not be empty"));
        }
        if let Some(id) = document_id {
            if self.store.get_document(id).await?.is_none() {
                return Err(Error::invalid_input(format!("document {id} does not exist")));
            }
        }

        tracing::debug!(stage = %QueryStage::EmbedQuery);
        let embedding = with_deadline(
            self.config.deadline,
            self.embedder.embed(question, EmbeddingIntent::Query),
            EmbeddingError::Timeout,
        )
        .await?;

        tracing::debug!(stage = %QueryStage::Retrieve);
        let request = SearchRequest {
            embedding: &embedding,
            document_id,
            limit: self.config.top_k,
            min_similarity: self.config.min_similarity,
        };
        let chunks = self.store.search(&request).await?;
        Ok(RetrievalSet::new(chunks))
    }

    /// Answers `question` from the stored chunks, optionally restricted to one document.
    #[instrument(skip(self, question))]
    pub async fn answer(&self, question: &str, document_id: Option<DocumentId>) -> Result<Answer> {
        let set = self.retrieve(question, document_id).await?;
        let answer = self.composer.compose(question.trim(), &set).await?;
        tracing::info!(
            retrieved = set.len(),
            citations = answer.citations.len(),
            "answered question"
        );
        Ok(answer)
    }

    async fn embed_with_retry(
        &self,
        text: &str,
        intent: EmbeddingIntent,
    ) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let policy = self.config.retry;
        let mut attempt = 0usize;
        loop {
            let result = with_deadline(
                self.config.deadline,
                self.embedder.embed(text, intent),
                EmbeddingError::Timeout,
            )
            .await;
            match result {
                Ok(vector) => return Ok(vector),
                Err(err)
                    if RetryPolicy::is_transient(&err) && attempt + 1 < policy.max_attempts =>
                {
                    attempt += 1;
                    let delay = policy.backoff(attempt);
                    tracing::warn!(attempt, ?delay, error = %err, "retrying embedding");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn purge(&self, document_id: DocumentId) {
        match self.store.delete_by_document(document_id).await {
            Ok(removed) => tracing::warn!(removed, "purged partial ingestion"),
            Err(err) => tracing::error!(error = %err, "failed to purge partial ingestion"),
        }
    }
}

/// Awaits `fut`, mapping expiry of `deadline` through `on_timeout`.
pub(crate) async fn with_deadline<F, T, E>(
    deadline: Option<Duration>,
    fut: F,
    on_timeout: fn(Duration) -> E,
) -> std::result::Result<T, E>
where
    F: Future<Output = std::result::Result<T, E>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(limit)),
        },
        None => fut.await,
    }
}
