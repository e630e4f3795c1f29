//! Error taxonomy shared by every pipeline stage.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::store::DocumentId;

/// Failures raised by an embedding service call.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The request never produced a response.
    #[error("embedding request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("embedding service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, or a placeholder when unreadable.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("failed to decode embedding response: {0}")]
    Decode(String),

    /// The service returned a vector of the wrong length.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension {
        /// Configured dimension.
        expected: usize,
        /// Length of the returned vector.
        actual: usize,
    },

    /// The call exceeded the injected deadline.
    #[error("embedding call exceeded deadline of {0:?}")]
    Timeout(Duration),

    /// The client was built with unusable settings.
    #[error("invalid embedding configuration: {0}")]
    Config(String),
}

/// Failures raised by a text generation service call.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The request never produced a response.
    #[error("generation request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// The service answered with a non-success status.
    #[error("generation service returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, or a placeholder when unreadable.
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("failed to decode generation response: {0}")]
    Decode(String),

    /// The call exceeded the injected deadline.
    #[error("generation call exceeded deadline of {0:?}")]
    Timeout(Duration),

    /// The client was built with unusable settings.
    #[error("invalid generation configuration: {0}")]
    Config(String),
}

/// Failures raised by the document and chunk stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Postgres connection, statement, or transaction failure.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A chunk referenced a document that does not exist (or no longer does).
    #[error("document {0} does not exist")]
    MissingDocument(DocumentId),

    /// An embedding did not match the store's configured dimension.
    #[error("embedding dimension mismatch: store expects {expected}, got {actual}")]
    Dimension {
        /// Store dimension.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },

    /// A persisted row could not be decoded.
    #[error("failed to decode stored row: {0}")]
    Decode(String),

    /// The store was configured with unusable names or sizes.
    #[error("invalid store configuration: {0}")]
    Config(String),
}

/// Failures raised while reading text out of a PDF.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The file could not be parsed as a PDF.
    #[error("failed to read PDF {}: {source}", .path.display())]
    Pdf {
        /// File that failed to load.
        path: PathBuf,
        /// Underlying parser error.
        #[source]
        source: lopdf::Error,
    },

    /// The blocking extraction task panicked or was cancelled.
    #[error("extraction task failed: {0}")]
    Task(String),
}

/// Crate-level error returned by pipeline operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Embedding service failure.
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    /// Store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Generation service failure.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// PDF text extraction failure.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// The caller supplied something the pipeline cannot act on.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Shorthand for [`Error::InvalidInput`].
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// True when the failure was caused by the caller rather than a service.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
