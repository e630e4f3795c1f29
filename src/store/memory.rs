//! In-process backend for tests, dry runs, and the `--in-memory` CLI mode.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use super::{
    ensure_dimension, rank_rows, ChunkId, ChunkMetadata, Document, DocumentId, DocumentStore,
    RetrievedChunk, SearchRequest, VectorStore,
};
use crate::error::StorageError;

struct StoredChunk {
    id: ChunkId,
    document_id: DocumentId,
    content: String,
    embedding: Vec<f32>,
    metadata: ChunkMetadata,
}

#[derive(Default)]
struct State {
    next_document_id: DocumentId,
    next_chunk_id: ChunkId,
    documents: BTreeMap<DocumentId, Document>,
    chunks: Vec<StoredChunk>,
}

/// Documents and chunks held behind a single async lock.
pub struct MemoryStore {
    dimension: usize,
    state: RwLock<State>,
}

impl MemoryStore {
    /// Creates an empty store accepting vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(State::default()),
        }
    }

    /// Total number of chunk rows across all documents.
    pub async fn chunk_count(&self) -> usize {
        self.state.read().await.chunks.len()
    }

    /// Number of chunk rows belonging to `document_id`.
    pub async fn chunks_for(&self, document_id: DocumentId) -> usize {
        self.state
            .read()
            .await
            .chunks
            .iter()
            .filter(|chunk| chunk.document_id == document_id)
            .count()
    }
}

impl DocumentStore for MemoryStore {
    async fn create_document(&self, filename: &str) -> Result<DocumentId, StorageError> {
        let mut state = self.state.write().await;
        state.next_document_id += 1;
        let id = state.next_document_id;
        state.documents.insert(
            id,
            Document {
                id,
                filename: filename.to_string(),
                content: None,
                created_at_epoch_ms: now_epoch_ms(),
            },
        );
        Ok(id)
    }

    async fn set_document_content(
        &self,
        id: DocumentId,
        content: &str,
    ) -> Result<(), StorageError> {
        let mut state = self.state.write().await;
        let document = state
            .documents
            .get_mut(&id)
            .ok_or(StorageError::MissingDocument(id))?;
        document.content = Some(content.to_string());
        Ok(())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StorageError> {
        Ok(self.state.read().await.documents.get(&id).cloned())
    }

    async fn delete_document(&self, id: DocumentId) -> Result<bool, StorageError> {
        let mut state = self.state.write().await;
        if state.documents.remove(&id).is_none() {
            return Ok(false);
        }
        state.chunks.retain(|chunk| chunk.document_id != id);
        Ok(true)
    }

    async fn count_documents(&self) -> Result<u64, StorageError> {
        Ok(self.state.read().await.documents.len() as u64)
    }
}

impl VectorStore for MemoryStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn store(
        &self,
        document_id: DocumentId,
        content: &str,
        embedding: &[f32],
        metadata: &ChunkMetadata,
    ) -> Result<ChunkId, StorageError> {
        ensure_dimension(self.dimension, embedding)?;
        let mut state = self.state.write().await;
        if !state.documents.contains_key(&document_id) {
            return Err(StorageError::MissingDocument(document_id));
        }
        state.next_chunk_id += 1;
        let id = state.next_chunk_id;
        state.chunks.push(StoredChunk {
            id,
            document_id,
            content: content.to_string(),
            embedding: embedding.to_vec(),
            metadata: metadata.clone(),
        });
        Ok(id)
    }

    async fn delete_by_document(&self, document_id: DocumentId) -> Result<u64, StorageError> {
        let mut state = self.state.write().await;
        let before = state.chunks.len();
        state.chunks.retain(|chunk| chunk.document_id != document_id);
        Ok((before - state.chunks.len()) as u64)
    }

    async fn search(
        &self,
        request: &SearchRequest<'_>,
    ) -> Result<Vec<RetrievedChunk>, StorageError> {
        ensure_dimension(self.dimension, request.embedding)?;
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        let mut scored: Vec<(ChunkId, f32, &StoredChunk)> = state
            .chunks
            .iter()
            .filter(|chunk| {
                request
                    .document_id
                    .map_or(true, |id| chunk.document_id == id)
            })
            .map(|chunk| {
                let score = cosine_similarity(request.embedding, &chunk.embedding);
                (chunk.id, score, chunk)
            })
            .filter(|(_, score, _)| *score >= request.min_similarity)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(request.limit);
        Ok(rank_rows(scored.into_iter().map(|(_, score, chunk)| {
            (chunk.content.clone(), chunk.metadata.clone(), score)
        })))
    }
}

/// Cosine similarity in `[-1, 1]`; zero-norm vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(embedding: &[f32], limit: usize, floor: f32) -> SearchRequest<'_> {
        SearchRequest {
            embedding,
            document_id: None,
            limit,
            min_similarity: floor,
        }
    }

    async fn store_with_document() -> (MemoryStore, DocumentId) {
        let store = MemoryStore::new(3);
        let id = store.create_document("notes.pdf").await.unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn search_returns_at_most_limit_rows() {
        let (store, doc) = store_with_document().await;
        for i in 0..8 {
            let meta = ChunkMetadata::new(1, i);
            store
                .store(doc, &format!("chunk {i}"), &[1.0, 0.1 * i as f32, 0.0], &meta)
                .await
                .unwrap();
        }
        let hits = store.search(&request(&[1.0, 0.0, 0.0], 5, 0.0)).await.unwrap();
        assert_eq!(hits.len(), 5);
        assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        let ranks: Vec<usize> = hits.iter().map(|h| h.index).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn identical_vector_ranks_first_with_full_similarity() {
        let (store, doc) = store_with_document().await;
        store
            .store(doc, "off", &[0.0, 1.0, 0.2], &ChunkMetadata::new(1, 0))
            .await
            .unwrap();
        store
            .store(doc, "exact", &[0.3, 0.4, 0.5], &ChunkMetadata::new(2, 0))
            .await
            .unwrap();
        let hits = store.search(&request(&[0.3, 0.4, 0.5], 5, 0.0)).await.unwrap();
        assert_eq!(hits[0].content, "exact");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn ties_keep_insertion_order() {
        let (store, doc) = store_with_document().await;
        for name in ["first", "second", "third"] {
            store
                .store(doc, name, &[1.0, 1.0, 0.0], &ChunkMetadata::new(1, 0))
                .await
                .unwrap();
        }
        let hits = store.search(&request(&[1.0, 1.0, 0.0], 5, 0.6)).await.unwrap();
        let names: Vec<&str> = hits.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn metadata_round_trips() {
        let (store, doc) = store_with_document().await;
        let mut meta = ChunkMetadata::new(3, 1);
        meta.extra
            .insert("section".into(), serde_json::json!("methods"));
        store.store(doc, "text", &[1.0, 0.0, 0.0], &meta).await.unwrap();
        let hits = store.search(&request(&[1.0, 0.0, 0.0], 5, 0.6)).await.unwrap();
        assert_eq!(hits[0].metadata, meta);
        assert_eq!(hits[0].page_number(), Some(3));
    }

    #[tokio::test]
    async fn document_filter_restricts_results() {
        let store = MemoryStore::new(3);
        let a = store.create_document("a.pdf").await.unwrap();
        let b = store.create_document("b.pdf").await.unwrap();
        store
            .store(a, "from a", &[1.0, 0.0, 0.0], &ChunkMetadata::new(1, 0))
            .await
            .unwrap();
        store
            .store(b, "from b", &[1.0, 0.0, 0.0], &ChunkMetadata::new(1, 0))
            .await
            .unwrap();
        let mut req = request(&[1.0, 0.0, 0.0], 5, 0.6);
        req.document_id = Some(b);
        let hits = store.search(&req).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "from b");
    }

    #[tokio::test]
    async fn rows_below_the_floor_are_omitted() {
        let (store, doc) = store_with_document().await;
        store
            .store(doc, "orthogonal", &[0.0, 1.0, 0.0], &ChunkMetadata::new(1, 0))
            .await
            .unwrap();
        let hits = store.search(&request(&[1.0, 0.0, 0.0], 5, 0.6)).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn delete_by_document_is_idempotent() {
        let (store, doc) = store_with_document().await;
        store
            .store(doc, "x", &[1.0, 0.0, 0.0], &ChunkMetadata::new(1, 0))
            .await
            .unwrap();
        assert_eq!(store.delete_by_document(doc).await.unwrap(), 1);
        assert_eq!(store.delete_by_document(doc).await.unwrap(), 0);
        assert_eq!(store.delete_by_document(999).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deleting_a_document_cascades_to_chunks() {
        let (store, doc) = store_with_document().await;
        for i in 0..3 {
            store
                .store(doc, "x", &[1.0, 0.0, 0.0], &ChunkMetadata::new(1, i))
                .await
                .unwrap();
        }
        assert!(store.delete_document(doc).await.unwrap());
        assert_eq!(store.chunks_for(doc).await, 0);
        assert!(!store.delete_document(doc).await.unwrap());
        assert_eq!(store.count_documents().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn storing_for_a_missing_document_fails() {
        let store = MemoryStore::new(3);
        let err = store
            .store(42, "x", &[1.0, 0.0, 0.0], &ChunkMetadata::new(1, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingDocument(42)));
        assert_eq!(store.chunk_count().await, 0);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let (store, doc) = store_with_document().await;
        let err = store
            .store(doc, "x", &[1.0, 0.0], &ChunkMetadata::new(1, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Dimension {
                expected: 3,
                actual: 2
            }
        ));
        assert!(store.search(&request(&[1.0], 5, 0.0)).await.is_err());
    }

    #[tokio::test]
    async fn zero_limit_returns_nothing() {
        let (store, doc) = store_with_document().await;
        store
            .store(doc, "x", &[1.0, 0.0, 0.0], &ChunkMetadata::new(1, 0))
            .await
            .unwrap();
        let hits = store.search(&request(&[1.0, 0.0, 0.0], 0, 0.0)).await.unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0);
    }
}
