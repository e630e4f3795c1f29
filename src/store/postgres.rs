//! Postgres + pgvector backend.

use pgvector::Vector;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::Json;
use tokio_postgres::{Client, NoTls, Row};

use super::{
    ensure_dimension, rank_rows, ChunkId, ChunkMetadata, Document, DocumentId, DocumentStore,
    RetrievedChunk, SearchRequest, VectorStore,
};
use crate::error::StorageError;

const DOCUMENTS_TABLE: &str = "documents";
const CHUNKS_TABLE: &str = "document_chunks";

/// Fully-qualified Postgres table name (schema + table).
#[derive(Debug, Clone)]
pub struct TableName {
    schema: String,
    table: String,
}

impl TableName {
    /// Builds a new table identifier.
    pub fn new<S, T>(schema: S, table: T) -> Result<Self, StorageError>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let schema = schema.into();
        let table = table.into();
        if schema.trim().is_empty() {
            return Err(StorageError::Config("schema name is required".into()));
        }
        if table.trim().is_empty() {
            return Err(StorageError::Config("table name is required".into()));
        }
        Ok(Self { schema, table })
    }

    /// Fully-qualified table reference with quoted identifiers.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    /// Returns the raw table string.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name for a secondary index on this table.
    pub fn index_name(&self, suffix: &str) -> String {
        quote_ident(&format!(
            "{}_{}_{}_idx",
            sanitize_ident(&self.schema),
            sanitize_ident(&self.table),
            suffix
        ))
    }
}

/// Quotes Postgres identifiers, escaping embedded quotes.
pub fn quote_ident(input: &str) -> String {
    let escaped = input.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn sanitize_ident(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

/// Document and chunk tables on a single Postgres connection.
///
/// `document_chunks.document_id` references `documents.id` with `ON DELETE
/// CASCADE`, so a chunk insert for a deleted document fails instead of leaving
/// an orphan behind.
pub struct PgStore {
    client: Client,
    documents: TableName,
    chunks: TableName,
    dimension: usize,
    sql: Statements,
}

struct Statements {
    insert_document: String,
    update_content: String,
    select_document: String,
    delete_document: String,
    count_documents: String,
    insert_chunk: String,
    delete_chunks: String,
    search: String,
}

impl Statements {
    fn new(documents: &TableName, chunks: &TableName) -> Self {
        let docs = documents.qualified();
        let chunks = chunks.qualified();
        Self {
            insert_document: format!("INSERT INTO {docs} (filename) VALUES ($1) RETURNING id"),
            update_content: format!("UPDATE {docs} SET content = $2 WHERE id = $1"),
            select_document: format!(
                "SELECT id, filename, content, \
                    (EXTRACT(EPOCH FROM created_at) * 1000)::BIGINT AS created_at_ms \
                FROM {docs} WHERE id = $1"
            ),
            delete_document: format!("DELETE FROM {docs} WHERE id = $1"),
            count_documents: format!("SELECT COUNT(*) AS total FROM {docs}"),
            insert_chunk: format!(
                "INSERT INTO {chunks} (document_id, content, embedding, metadata) \
                VALUES ($1, $2, $3, $4) RETURNING id"
            ),
            delete_chunks: format!("DELETE FROM {chunks} WHERE document_id = $1"),
            search: format!(
                "SELECT content, metadata, 1 - (embedding <=> $1) AS similarity \
                FROM {chunks} \
                WHERE ($2::BIGINT IS NULL OR document_id = $2) \
                    AND 1 - (embedding <=> $1) >= $3 \
                ORDER BY embedding <=> $1 ASC, id ASC \
                LIMIT $4"
            ),
        }
    }
}

impl PgStore {
    /// Connects to Postgres and drives the connection on a background task.
    pub async fn connect(
        database_url: &str,
        schema: &str,
        dimension: usize,
    ) -> Result<Self, StorageError> {
        if dimension == 0 {
            return Err(StorageError::Config(
                "embedding dimension must be positive".into(),
            ));
        }
        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "postgres connection error");
            }
        });
        let documents = TableName::new(schema, DOCUMENTS_TABLE)?;
        let chunks = TableName::new(schema, CHUNKS_TABLE)?;
        let sql = Statements::new(&documents, &chunks);
        Ok(Self {
            client,
            documents,
            chunks,
            dimension,
            sql,
        })
    }

    /// Creates the pgvector extension, both tables, and their indexes when missing.
    pub async fn prepare(&self) -> Result<(), StorageError> {
        self.client
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await?;
        let documents_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                filename TEXT NOT NULL,
                content TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.documents.qualified()
        );
        self.client.execute(&documents_ddl, &[]).await?;

        let chunks_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id BIGSERIAL PRIMARY KEY,
                document_id BIGINT NOT NULL REFERENCES {}(id) ON DELETE CASCADE,
                content TEXT NOT NULL,
                embedding VECTOR({}) NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            self.chunks.qualified(),
            self.documents.qualified(),
            self.dimension
        );
        self.client.execute(&chunks_ddl, &[]).await?;

        let document_index = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (document_id)",
            self.chunks.index_name("document_id"),
            self.chunks.qualified()
        );
        self.client.execute(&document_index, &[]).await?;

        let vector_index = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING hnsw (embedding vector_cosine_ops)",
            self.chunks.index_name("embedding_hnsw"),
            self.chunks.qualified()
        );
        self.client.execute(&vector_index, &[]).await?;
        tracing::info!(table = self.chunks.table(), dims = self.dimension, "schema ready");
        Ok(())
    }
}

impl DocumentStore for PgStore {
    async fn create_document(&self, filename: &str) -> Result<DocumentId, StorageError> {
        let row = self
            .client
            .query_one(self.sql.insert_document.as_str(), &[&filename])
            .await?;
        Ok(row.try_get("id")?)
    }

    async fn set_document_content(
        &self,
        id: DocumentId,
        content: &str,
    ) -> Result<(), StorageError> {
        let updated = self
            .client
            .execute(self.sql.update_content.as_str(), &[&id, &content])
            .await?;
        if updated == 0 {
            return Err(StorageError::MissingDocument(id));
        }
        Ok(())
    }

    async fn get_document(&self, id: DocumentId) -> Result<Option<Document>, StorageError> {
        let row = self
            .client
            .query_opt(self.sql.select_document.as_str(), &[&id])
            .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn delete_document(&self, id: DocumentId) -> Result<bool, StorageError> {
        let deleted = self
            .client
            .execute(self.sql.delete_document.as_str(), &[&id])
            .await?;
        Ok(deleted > 0)
    }

    async fn count_documents(&self) -> Result<u64, StorageError> {
        let row = self
            .client
            .query_one(self.sql.count_documents.as_str(), &[])
            .await?;
        let total: i64 = row.try_get("total")?;
        u64::try_from(total).map_err(|_| StorageError::Decode(format!("negative count {total}")))
    }
}

impl VectorStore for PgStore {
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
        let vector = Vector::from(embedding.to_vec());
        let metadata = Json(metadata);
        let row = self
            .client
            .query_one(
                self.sql.insert_chunk.as_str(),
                &[&document_id, &content, &vector, &metadata],
            )
            .await
            .map_err(|err| {
                if err.code() == Some(&SqlState::FOREIGN_KEY_VIOLATION) {
                    StorageError::MissingDocument(document_id)
                } else {
                    StorageError::Postgres(err)
                }
            })?;
        Ok(row.try_get("id")?)
    }

    async fn delete_by_document(&self, document_id: DocumentId) -> Result<u64, StorageError> {
        Ok(self
            .client
            .execute(self.sql.delete_chunks.as_str(), &[&document_id])
            .await?)
    }

    async fn search(
        &self,
        request: &SearchRequest<'_>,
    ) -> Result<Vec<RetrievedChunk>, StorageError> {
        ensure_dimension(self.dimension, request.embedding)?;
        if request.limit == 0 {
            return Ok(Vec::new());
        }
        let vector = Vector::from(request.embedding.to_vec());
        let floor = f64::from(request.min_similarity);
        let limit = i64::try_from(request.limit).unwrap_or(i64::MAX);
        let rows = self
            .client
            .query(
                self.sql.search.as_str(),
                &[&vector, &request.document_id, &floor, &limit],
            )
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(scored_from_row(&row)?);
        }
        Ok(rank_rows(out))
    }
}

fn document_from_row(row: &Row) -> Result<Document, StorageError> {
    Ok(Document {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        content: row.try_get("content")?,
        created_at_epoch_ms: row.try_get("created_at_ms")?,
    })
}

fn scored_from_row(row: &Row) -> Result<(String, ChunkMetadata, f32), StorageError> {
    let content: String = row.try_get("content")?;
    let Json(metadata): Json<ChunkMetadata> = row.try_get("metadata")?;
    let similarity: f64 = row.try_get("similarity")?;
    Ok((content, metadata, similarity as f32))
}
