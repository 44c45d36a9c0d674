//! Storage abstraction for docvec.
//!
//! The [`Store`] trait owns document identity, versioning, and the
//! documents → chunks → embeddings ownership tree. Two backends ship:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteStore`] | durable, WAL-mode SQLite file |
//! | [`InMemoryStore`] | tests and throwaway indexes |
//!
//! Deleting a document removes its chunks and their embeddings. Replacing a
//! document's chunks is all-or-nothing: readers see either the old batch or
//! the new one, never a mix.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{
    Chunk, ChunkDraft, DocumentWithChunks, EmbeddingCandidate, NewDocument, NewEmbedding,
    StoreStats,
};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](Store::upsert_document) | Insert or update a document row |
/// | [`replace_chunks`](Store::replace_chunks) | Swap a document's chunk batch atomically |
/// | [`commit_document`](Store::commit_document) | Both of the above as one unit |
/// | [`delete_document`](Store::delete_document) | Remove a document and everything it owns |
/// | [`iter_all_embeddings`](Store::iter_all_embeddings) | Snapshot of every vector for a model |
/// | [`statistics`](Store::statistics) | Counts and on-disk size |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update the document keyed by `doc.path`.
    ///
    /// Returns its id, which stays stable across updates.
    async fn upsert_document(&self, doc: &NewDocument) -> Result<i64>;

    /// Delete every chunk (and embedding) of `document_id` and insert the
    /// new batch in one transaction.
    ///
    /// `embeddings` is either empty (no vectors for this batch) or holds
    /// exactly one entry per chunk, in chunk order.
    async fn replace_chunks(
        &self,
        document_id: i64,
        chunks: &[ChunkDraft],
        embeddings: &[NewEmbedding],
    ) -> Result<()>;

    /// Upsert the document and replace its chunks.
    ///
    /// Backends that can should override this so both steps share a single
    /// transaction.
    async fn commit_document(
        &self,
        doc: &NewDocument,
        chunks: &[ChunkDraft],
        embeddings: &[NewEmbedding],
    ) -> Result<i64> {
        validate_batch(chunks, embeddings)?;
        let id = self.upsert_document(doc).await?;
        self.replace_chunks(id, chunks, embeddings).await?;
        Ok(id)
    }

    async fn document_exists(&self, path: &str) -> Result<bool> {
        Ok(self.get_document_timestamp(path).await?.is_some())
    }

    async fn get_document_timestamp(&self, path: &str) -> Result<Option<i64>>;

    /// Fetch a document with its chunks ordered by index.
    async fn get_document(&self, path: &str) -> Result<Option<DocumentWithChunks>>;

    async fn get_chunk(&self, chunk_id: i64) -> Result<Option<Chunk>>;

    /// Remove the document and cascade to its chunks and embeddings.
    ///
    /// Fails with [`Error::NotFound`] if no document has this path.
    async fn delete_document(&self, path: &str) -> Result<()>;

    /// All stored document paths, sorted.
    async fn list_document_paths(&self) -> Result<Vec<String>>;

    /// Every embedding for `model`, joined with its chunk and document.
    ///
    /// The result is a consistent snapshot: concurrent replacements are
    /// either fully visible or not at all.
    async fn iter_all_embeddings(&self, model: &str) -> Result<Vec<EmbeddingCandidate>>;

    /// Chunks with no embedding under `model`, in document/chunk order.
    async fn chunks_missing_embeddings(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Chunk>>;

    /// Insert or replace embeddings for existing chunks.
    async fn insert_embeddings(&self, items: &[(i64, NewEmbedding)]) -> Result<usize>;

    async fn statistics(&self) -> Result<StoreStats>;
}

/// Check a chunk/embedding batch before any row is touched.
pub fn validate_batch(chunks: &[ChunkDraft], embeddings: &[NewEmbedding]) -> Result<()> {
    if !embeddings.is_empty() && embeddings.len() != chunks.len() {
        return Err(Error::invalid_argument(format!(
            "{} embeddings supplied for {} chunks",
            embeddings.len(),
            chunks.len()
        )));
    }
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.end <= chunk.start {
            return Err(Error::invalid_argument(format!(
                "chunk {} has empty span [{}, {})",
                i, chunk.start, chunk.end
            )));
        }
    }
    validate_embeddings(embeddings.iter())
}

/// Every vector must match its declared dimension, and all vectors of one
/// model in a batch must share a dimension.
pub fn validate_embeddings<'a>(embeddings: impl Iterator<Item = &'a NewEmbedding>) -> Result<()> {
    let mut seen: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for emb in embeddings {
        if emb.vector.len() != emb.dimension {
            return Err(Error::invalid_argument(format!(
                "embedding declares dimension {} but has {} components",
                emb.dimension,
                emb.vector.len()
            )));
        }
        let expected = *seen.entry(emb.model.as_str()).or_insert(emb.dimension);
        if expected != emb.dimension {
            return Err(Error::invalid_argument(format!(
                "mixed dimensions for model '{}': {} and {}",
                emb.model, expected, emb.dimension
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(start: usize, end: usize) -> ChunkDraft {
        ChunkDraft {
            text: "x".repeat(end - start),
            start,
            end,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_validate_batch_count_mismatch() {
        let chunks = vec![draft(0, 3), draft(3, 6)];
        let embs = vec![NewEmbedding::new(vec![1.0, 0.0], "m")];
        assert!(matches!(
            validate_batch(&chunks, &embs),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_batch_allows_no_embeddings() {
        let chunks = vec![draft(0, 3)];
        assert!(validate_batch(&chunks, &[]).is_ok());
    }

    #[test]
    fn test_declared_dimension_must_match() {
        let chunks = vec![draft(0, 3)];
        let mut emb = NewEmbedding::new(vec![1.0, 2.0, 3.0], "m");
        emb.dimension = 4;
        assert!(validate_batch(&chunks, &[emb]).is_err());
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let chunks = vec![draft(0, 3), draft(3, 6)];
        let embs = vec![
            NewEmbedding::new(vec![1.0, 2.0], "m"),
            NewEmbedding::new(vec![1.0, 2.0, 3.0], "m"),
        ];
        assert!(validate_batch(&chunks, &embs).is_err());
    }

    #[test]
    fn test_empty_span_rejected() {
        let chunks = vec![ChunkDraft {
            text: String::new(),
            start: 4,
            end: 4,
            metadata: serde_json::json!({}),
        }];
        assert!(validate_batch(&chunks, &[]).is_err());
    }
}
