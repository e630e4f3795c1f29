#![warn(missing_docs)]
//! Page-aware question answering over uploaded PDFs.
//!
//! Ingestion splits each page into overlapping chunks, embeds them and stores
//! them beside their page number. Queries retrieve the closest chunks, ask a
//! model for a grounded answer, and resolve the model's `SOURCES: [...]`
//! directive into page citations.

pub mod answer;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod generator;
mod http;
pub mod ingest;
pub mod pdf;
pub mod pipeline;
pub mod store;
pub mod telemetry;

pub use answer::{Answer, AnswerComposer, Citation, RetrievalSet};
pub use chunker::{chunk, Chunker, ChunkerConfig, PageText, TextChunk};
pub use embedder::{AnyEmbedder, Embedder, EmbeddingIntent};
pub use error::{
    EmbeddingError, Error, ExtractionError, GenerationError, Result, StorageError,
};
pub use generator::{AnyGenerator, Generator};
pub use ingest::{IngestJob, IngestOutcome, IngestQueue, SubmitError};
pub use pdf::{ensure_pdf, LopdfExtractor, PageExtractor};
pub use pipeline::{IngestReport, Pipeline, PipelineConfig, RetryPolicy};
pub use store::{
    ChunkMetadata, Document, DocumentId, DocumentStore, MemoryStore, PgStore, RetrievedChunk,
    SearchRequest, VectorStore,
};
