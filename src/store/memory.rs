//! In-memory [`Store`] implementation for tests and throwaway indexes.
//!
//! All state sits behind one `tokio::sync::RwLock`, so every write is
//! atomic with respect to readers without a transaction log.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::chunk::content_hash;
use crate::error::{Error, Result};
use crate::models::{
    Chunk, ChunkDraft, Document, DocumentWithChunks, EmbeddingCandidate, NewDocument,
    NewEmbedding, StoreStats,
};

use super::{validate_batch, validate_embeddings, Store};

#[derive(Default)]
struct State {
    next_doc_id: i64,
    next_chunk_id: i64,
    /// Keyed by path.
    docs: BTreeMap<String, Document>,
    /// Keyed by chunk id.
    chunks: BTreeMap<i64, Chunk>,
    /// Keyed by (chunk id, model).
    embeddings: BTreeMap<(i64, String), Vec<f32>>,
}

impl State {
    fn upsert(&mut self, doc: &NewDocument) -> i64 {
        if let Some(existing) = self.docs.get_mut(&doc.path) {
            existing.timestamp = doc.timestamp;
            existing.metadata = doc.metadata.clone();
            existing.content_hash = doc.content_hash.clone();
            return existing.id;
        }
        self.next_doc_id += 1;
        let id = self.next_doc_id;
        self.docs.insert(
            doc.path.clone(),
            Document {
                id,
                path: doc.path.clone(),
                timestamp: doc.timestamp,
                metadata: doc.metadata.clone(),
                content_hash: doc.content_hash.clone(),
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        id
    }

    fn drop_chunks_of(&mut self, document_id: i64) {
        let doomed: Vec<i64> = self
            .chunks
            .values()
            .filter(|c| c.document_id == document_id)
            .map(|c| c.id)
            .collect();
        for id in &doomed {
            self.chunks.remove(id);
        }
        self.embeddings.retain(|(chunk_id, _), _| !doomed.contains(chunk_id));
    }

    fn replace(&mut self, document_id: i64, chunks: &[ChunkDraft], embeddings: &[NewEmbedding]) {
        self.drop_chunks_of(document_id);
        let now = chrono::Utc::now().timestamp();
        for (i, draft) in chunks.iter().enumerate() {
            self.next_chunk_id += 1;
            let id = self.next_chunk_id;
            self.chunks.insert(
                id,
                Chunk {
                    id,
                    document_id,
                    chunk_index: i as i64,
                    start: draft.start,
                    end: draft.end,
                    text: draft.text.clone(),
                    metadata: draft.metadata.clone(),
                    hash: content_hash(&draft.text),
                    created_at: now,
                },
            );
            if let Some(emb) = embeddings.get(i) {
                self.embeddings
                    .insert((id, emb.model.clone()), emb.vector.clone());
            }
        }
    }

    fn doc_by_id(&self, id: i64) -> Option<&Document> {
        self.docs.values().find(|d| d.id == id)
    }
}

pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_document(&self, doc: &NewDocument) -> Result<i64> {
        Ok(self.state.write().await.upsert(doc))
    }

    async fn replace_chunks(
        &self,
        document_id: i64,
        chunks: &[ChunkDraft],
        embeddings: &[NewEmbedding],
    ) -> Result<()> {
        validate_batch(chunks, embeddings)?;
        let mut state = self.state.write().await;
        if state.doc_by_id(document_id).is_none() {
            return Err(Error::not_found(format!("document id {}", document_id)));
        }
        state.replace(document_id, chunks, embeddings);
        Ok(())
    }

    async fn commit_document(
        &self,
        doc: &NewDocument,
        chunks: &[ChunkDraft],
        embeddings: &[NewEmbedding],
    ) -> Result<i64> {
        validate_batch(chunks, embeddings)?;
        let mut state = self.state.write().await;
        let id = state.upsert(doc);
        state.replace(id, chunks, embeddings);
        Ok(id)
    }

    async fn get_document_timestamp(&self, path: &str) -> Result<Option<i64>> {
        Ok(self.state.read().await.docs.get(path).map(|d| d.timestamp))
    }

    async fn get_document(&self, path: &str) -> Result<Option<DocumentWithChunks>> {
        let state = self.state.read().await;
        let Some(document) = state.docs.get(path).cloned() else {
            return Ok(None);
        };
        let mut chunks: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|c| c.document_id == document.id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(Some(DocumentWithChunks { document, chunks }))
    }

    async fn get_chunk(&self, chunk_id: i64) -> Result<Option<Chunk>> {
        Ok(self.state.read().await.chunks.get(&chunk_id).cloned())
    }

    async fn delete_document(&self, path: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let doc = state
            .docs
            .remove(path)
            .ok_or_else(|| Error::not_found(format!("document '{}'", path)))?;
        state.drop_chunks_of(doc.id);
        Ok(())
    }

    async fn list_document_paths(&self) -> Result<Vec<String>> {
        Ok(self.state.read().await.docs.keys().cloned().collect())
    }

    async fn iter_all_embeddings(&self, model: &str) -> Result<Vec<EmbeddingCandidate>> {
        let state = self.state.read().await;
        let mut out = Vec::new();
        for ((chunk_id, m), vector) in &state.embeddings {
            if m != model {
                continue;
            }
            let Some(chunk) = state.chunks.get(chunk_id) else {
                continue;
            };
            let Some(doc) = state.doc_by_id(chunk.document_id) else {
                continue;
            };
            out.push(EmbeddingCandidate {
                chunk_id: *chunk_id,
                document_id: doc.id,
                document_path: doc.path.clone(),
                chunk_index: chunk.chunk_index,
                text: chunk.text.clone(),
                vector: vector.clone(),
                document_metadata: doc.metadata.clone(),
            });
        }
        Ok(out)
    }

    async fn chunks_missing_embeddings(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Chunk>> {
        let state = self.state.read().await;
        let mut missing: Vec<Chunk> = state
            .chunks
            .values()
            .filter(|c| !state.embeddings.contains_key(&(c.id, model.to_string())))
            .cloned()
            .collect();
        missing.sort_by_key(|c| (c.document_id, c.chunk_index));
        if let Some(limit) = limit {
            missing.truncate(limit);
        }
        Ok(missing)
    }

    async fn insert_embeddings(&self, items: &[(i64, NewEmbedding)]) -> Result<usize> {
        validate_embeddings(items.iter().map(|(_, e)| e))?;
        let mut state = self.state.write().await;
        if let Some((missing, _)) = items.iter().find(|(id, _)| !state.chunks.contains_key(id)) {
            return Err(Error::not_found(format!("chunk {}", missing)));
        }
        for (chunk_id, emb) in items {
            state
                .embeddings
                .insert((*chunk_id, emb.model.clone()), emb.vector.clone());
        }
        Ok(items.len())
    }

    async fn statistics(&self) -> Result<StoreStats> {
        let state = self.state.read().await;
        let mut embedding_counts = BTreeMap::new();
        for (_, model) in state.embeddings.keys() {
            *embedding_counts.entry(model.clone()).or_insert(0i64) += 1;
        }
        Ok(StoreStats {
            document_count: state.docs.len() as i64,
            chunk_count: state.chunks.len() as i64,
            embedding_counts,
            database_path: None,
            database_size_bytes: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, ts: i64) -> NewDocument {
        NewDocument {
            path: path.to_string(),
            timestamp: ts,
            metadata: serde_json::json!({}),
            content_hash: String::new(),
        }
    }

    #[tokio::test]
    async fn test_commit_replace_and_delete() {
        let store = InMemoryStore::new();
        let text = "one two three";
        let chunks = vec![
            ChunkDraft::from_span(text, 0, 4, serde_json::json!({})),
            ChunkDraft::from_span(text, 4, 13, serde_json::json!({})),
        ];
        let embs = vec![
            NewEmbedding::new(vec![1.0, 0.0], "m"),
            NewEmbedding::new(vec![0.0, 1.0], "m"),
        ];
        let id = store
            .commit_document(&doc("a.md", 1), &chunks, &embs)
            .await
            .unwrap();
        assert_eq!(store.iter_all_embeddings("m").await.unwrap().len(), 2);

        let replacement = vec![ChunkDraft::from_span(text, 0, 13, serde_json::json!({}))];
        store.replace_chunks(id, &replacement, &[]).await.unwrap();
        let got = store.get_document("a.md").await.unwrap().unwrap();
        assert_eq!(got.chunks.len(), 1);
        assert!(store.iter_all_embeddings("m").await.unwrap().is_empty());

        store.delete_document("a.md").await.unwrap();
        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.chunk_count, 0);
        assert!(matches!(
            store.delete_document("a.md").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_replace_unknown_document() {
        let store = InMemoryStore::new();
        let chunks = vec![ChunkDraft::from_span("abc", 0, 3, serde_json::json!({}))];
        assert!(store.replace_chunks(42, &chunks, &[]).await.is_err());
    }
}
