//! Document rows and the chunk vector store.
//!
//! Two backends implement both traits: [`PgStore`] (Postgres + pgvector) and
//! [`MemoryStore`]. Chunk rows always reference an existing document; deleting
//! the document removes its chunks.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

mod memory;
mod postgres;

pub use memory::{cosine_similarity, MemoryStore};
pub use postgres::{quote_ident, PgStore, TableName};

/// Default similarity floor applied to searches.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.6;
/// Default number of chunks returned per search.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Identifier of a document row.
pub type DocumentId = i64;
/// Storage identifier of a chunk row.
pub type ChunkId = i64;

/// Uploaded document tracked by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Row identifier.
    pub id: DocumentId,
    /// Original upload filename.
    pub filename: String,
    /// Concatenated page text, set once ingestion completes.
    pub content: Option<String>,
    /// Creation time in milliseconds since the Unix epoch.
    pub created_at_epoch_ms: i64,
}

/// Metadata stored beside every chunk.
///
/// `page_number` and `chunk_index` are always written by ingestion; other keys
/// round-trip untouched through `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 1-based source page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// 0-based position within the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,
    /// Any additional keys.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChunkMetadata {
    /// Metadata for a chunk at `chunk_index` on `page_number`.
    pub fn new(page_number: u32, chunk_index: u32) -> Self {
        Self {
            page_number: Some(page_number),
            chunk_index: Some(chunk_index),
            extra: serde_json::Map::new(),
        }
    }
}

/// Nearest-neighbour query against the vector store.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    /// Query embedding.
    pub embedding: &'a [f32],
    /// Restricts results to one document when set.
    pub document_id: Option<DocumentId>,
    /// Maximum number of rows returned.
    pub limit: usize,
    /// Rows with a lower similarity are omitted.
    pub min_similarity: f32,
}

/// Search hit scoped to a single query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    /// 0-based rank within this query's results. Not a storage identifier.
    pub index: usize,
    /// Chunk text.
    pub content: String,
    /// Stored metadata.
    pub metadata: ChunkMetadata,
    /// `1 - cosine_distance` between the chunk and the query.
    pub similarity: f32,
}

impl RetrievedChunk {
    /// Source page, when recorded.
    pub fn page_number(&self) -> Option<u32> {
        self.metadata.page_number
    }
}

/// Assigns ranks to rows that are already ordered best match first.
pub(crate) fn rank_rows<I>(rows: I) -> Vec<RetrievedChunk>
where
    I: IntoIterator<Item = (String, ChunkMetadata, f32)>,
{
    rows.into_iter()
        .enumerate()
        .map(|(index, (content, metadata, similarity))| RetrievedChunk {
            index,
            content,
            metadata,
            similarity,
        })
        .collect()
}

/// Persistence of document rows.
pub trait DocumentStore: Send + Sync {
    /// Inserts a document row and returns its id.
    fn create_document(
        &self,
        filename: &str,
    ) -> impl Future<Output = Result<DocumentId, StorageError>> + Send;

    /// Records the concatenated text of an ingested document.
    fn set_document_content(
        &self,
        id: DocumentId,
        content: &str,
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Looks a document up by id.
    fn get_document(
        &self,
        id: DocumentId,
    ) -> impl Future<Output = Result<Option<Document>, StorageError>> + Send;

    /// Deletes a document and every chunk that references it.
    /// Returns false when no such document existed.
    fn delete_document(
        &self,
        id: DocumentId,
    ) -> impl Future<Output = Result<bool, StorageError>> + Send;

    /// Number of stored documents.
    fn count_documents(&self) -> impl Future<Output = Result<u64, StorageError>> + Send;
}

/// Persistence and similarity search of embedded chunks.
pub trait VectorStore: Send + Sync {
    /// Embedding dimension every stored vector must have.
    fn dimension(&self) -> usize;

    /// Appends an immutable chunk row and returns its storage id.
    fn store(
        &self,
        document_id: DocumentId,
        content: &str,
        embedding: &[f32],
        metadata: &ChunkMetadata,
    ) -> impl Future<Output = Result<ChunkId, StorageError>> + Send;

    /// Removes all chunks of a document. Returns the number of rows removed.
    fn delete_by_document(
        &self,
        document_id: DocumentId,
    ) -> impl Future<Output = Result<u64, StorageError>> + Send;

    /// Returns at most `limit` chunks by descending similarity, ties in insertion order.
    fn search(
        &self,
        request: &SearchRequest<'_>,
    ) -> impl Future<Output = Result<Vec<RetrievedChunk>, StorageError>> + Send;
}

pub(crate) fn ensure_dimension(expected: usize, embedding: &[f32]) -> Result<(), StorageError> {
    if embedding.len() == expected {
        Ok(())
    } else {
        Err(StorageError::Dimension {
            expected,
            actual: embedding.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_keeps_extra_keys() {
        let raw = json!({"page_number": 3, "chunk_index": 1, "section": "intro"});
        let metadata: ChunkMetadata = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(metadata.page_number, Some(3));
        assert_eq!(metadata.chunk_index, Some(1));
        assert_eq!(metadata.extra.get("section"), Some(&json!("intro")));
        assert_eq!(serde_json::to_value(&metadata).unwrap(), raw);
    }

    #[test]
    fn missing_page_number_decodes_as_none() {
        let metadata: ChunkMetadata = serde_json::from_value(json!({})).unwrap();
        assert_eq!(metadata.page_number, None);
        assert_eq!(metadata.chunk_index, None);
    }

    #[test]
    fn rank_rows_numbers_from_zero() {
        let rows = vec![
            ("a".to_string(), ChunkMetadata::new(1, 0), 0.9),
            ("b".to_string(), ChunkMetadata::new(2, 0), 0.8),
        ];
        let ranked = rank_rows(rows);
        assert_eq!(ranked[0].index, 0);
        assert_eq!(ranked[1].index, 1);
        assert_eq!(ranked[1].page_number(), Some(2));
    }
}
