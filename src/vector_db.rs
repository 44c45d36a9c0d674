//! Store orchestrator: chunk → embed → commit, plus search.
//!
//! [`VectorDb`] owns one [`Store`], one [`Chunker`], an optional
//! [`Embedder`] and a default [`SimilarityMetric`]. Strategies are trait
//! objects picked at construction and swappable afterwards.
//!
//! ```text
//! add_document(path, content, ts, meta, mode)
//!   │
//!   ├─ lock(path)                       per-path, held until commit
//!   ├─ update policy vs stored ts       error │ skip │ update_if_newer │ force
//!   ├─ chunker.chunk(content)           may call the reasoning service
//!   ├─ embedder.embed(batch) × n        each batch under embed_timeout
//!   └─ store.commit_document(...)       one transaction
//! ```
//!
//! Commit is the last step, so a failure or cancellation anywhere earlier
//! leaves the previously stored version intact.

use std::sync::Arc;
use std::time::Duration;

use crate::chunk::{
    content_hash, AssistedChunker, AssistedOptions, CancelToken, Chunker, SimpleChunker,
};
use crate::config::Config;
use crate::embedding::{create_embedder, embed_query, Embedder};
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::models::{
    AddOutcome, ChunkDraft, DocumentWithChunks, NewDocument, NewEmbedding, SearchHit, StoreStats,
    UpdateMode,
};
use crate::reasoning::create_reasoner;
use crate::search::{CandidateFilter, Searcher};
use crate::similarity::{metric_from_name, Cosine, SimilarityMetric};
use crate::store::{SqliteStore, Store};

/// Knobs the orchestrator applies to every document.
#[derive(Debug, Clone)]
pub struct VectorDbOptions {
    pub max_chunk_size: usize,
    pub overlap: usize,
    /// Texts per embedding call.
    pub batch_size: usize,
    /// Upper bound on one embedding call, retries included.
    pub embed_timeout: Duration,
}

impl Default for VectorDbOptions {
    fn default() -> Self {
        Self {
            max_chunk_size: 500,
            overlap: 0,
            batch_size: 8,
            embed_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&Config> for VectorDbOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_chunk_size: config.chunking.max_chunk_size,
            overlap: config.chunking.overlap,
            batch_size: config.embedding.batch_size,
            embed_timeout: Duration::from_secs(config.embedding.batch_timeout_secs),
        }
    }
}

pub struct VectorDb<S: Store = SqliteStore> {
    store: S,
    chunker: Box<dyn Chunker>,
    embedder: Option<Arc<dyn Embedder>>,
    metric: Box<dyn SimilarityMetric>,
    options: VectorDbOptions,
    locks: KeyedLocks<String>,
}

impl VectorDb<SqliteStore> {
    /// Open the configured database and build every strategy from config.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = SqliteStore::open(&config.db.path).await?;
        let chunker = build_chunker(config)?;
        let mut db = VectorDb::new(store, chunker, VectorDbOptions::from(config));
        if config.embedding.is_enabled() {
            db.set_embedder(Some(create_embedder(&config.embedding)?));
        }
        db.set_similarity_metric(metric_from_name(&config.retrieval.metric)?);
        Ok(db)
    }
}

/// The chunker named by `chunking.strategy`.
pub fn build_chunker(config: &Config) -> Result<Box<dyn Chunker>> {
    match config.chunking.strategy.as_str() {
        "simple" => Ok(Box::new(SimpleChunker::new())),
        "assisted" => {
            let reasoner = create_reasoner(&config.reasoning)?;
            Ok(Box::new(AssistedChunker::new(
                reasoner,
                AssistedOptions::from(&config.chunking),
            )))
        }
        other => Err(Error::config(format!("Unknown chunking strategy: {}", other))),
    }
}

impl<S: Store> VectorDb<S> {
    /// A database with no embedder and cosine similarity.
    pub fn new(store: S, chunker: Box<dyn Chunker>, options: VectorDbOptions) -> Self {
        Self {
            store,
            chunker,
            embedder: None,
            metric: Box::new(Cosine),
            options,
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &VectorDbOptions {
        &self.options
    }

    pub fn chunker(&self) -> &dyn Chunker {
        self.chunker.as_ref()
    }

    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    pub fn metric(&self) -> &dyn SimilarityMetric {
        self.metric.as_ref()
    }

    pub fn set_chunker(&mut self, chunker: Box<dyn Chunker>) {
        self.chunker = chunker;
    }

    /// `None` stores documents without vectors.
    pub fn set_embedder(&mut self, embedder: Option<Arc<dyn Embedder>>) {
        self.embedder = embedder;
    }

    pub fn set_similarity_metric(&mut self, metric: Box<dyn SimilarityMetric>) {
        self.metric = metric;
    }

    /// Add `content` under `path`, applying `mode` if the path is taken.
    pub async fn add_document(
        &self,
        path: &str,
        content: &str,
        timestamp: i64,
        metadata: serde_json::Value,
        mode: UpdateMode,
    ) -> Result<AddOutcome> {
        let cancel = CancelToken::new();
        self.add_document_with_cancel(path, content, timestamp, metadata, mode, &cancel)
            .await
    }

    /// [`add_document`](Self::add_document) with a caller-held cancel token.
    ///
    /// A cancelled job returns [`Error::Cancelled`] and writes nothing.
    pub async fn add_document_with_cancel(
        &self,
        path: &str,
        content: &str,
        timestamp: i64,
        metadata: serde_json::Value,
        mode: UpdateMode,
        cancel: &CancelToken,
    ) -> Result<AddOutcome> {
        check_path(path)?;
        let _guard = self.locks.lock(path.to_string()).await;

        let stored = self.store.get_document_timestamp(path).await?;
        if let Some(stored_ts) = stored {
            match mode {
                UpdateMode::Error => {
                    return Err(Error::DocumentExists(path.to_string()));
                }
                UpdateMode::Skip => {
                    tracing::debug!(path, "document exists, skipping");
                    return Ok(AddOutcome::Skipped);
                }
                UpdateMode::UpdateIfNewer if timestamp <= stored_ts => {
                    tracing::debug!(path, timestamp, stored_ts, "document not newer, skipping");
                    return Ok(AddOutcome::Skipped);
                }
                UpdateMode::UpdateIfNewer | UpdateMode::Force => {}
            }
        }

        let (document_id, chunks) = self
            .write_document(path, content, timestamp, metadata, cancel)
            .await?;

        if stored.is_some() {
            tracing::info!(path, document_id, chunks, "document updated");
            Ok(AddOutcome::Updated {
                document_id,
                chunks,
            })
        } else {
            tracing::info!(path, document_id, chunks, "document added");
            Ok(AddOutcome::Added {
                document_id,
                chunks,
            })
        }
    }

    /// Replace the document at `path` regardless of timestamps.
    ///
    /// Fails with [`Error::NotFound`] when the path is absent and
    /// `create_if_missing` is false.
    pub async fn update_document(
        &self,
        path: &str,
        content: &str,
        timestamp: i64,
        metadata: serde_json::Value,
        create_if_missing: bool,
    ) -> Result<AddOutcome> {
        check_path(path)?;
        let _guard = self.locks.lock(path.to_string()).await;

        let exists = self.store.document_exists(path).await?;
        if !exists && !create_if_missing {
            return Err(Error::not_found(format!("document '{}'", path)));
        }

        let (document_id, chunks) = self
            .write_document(path, content, timestamp, metadata, &CancelToken::new())
            .await?;

        Ok(if exists {
            AddOutcome::Updated {
                document_id,
                chunks,
            }
        } else {
            AddOutcome::Added {
                document_id,
                chunks,
            }
        })
    }

    /// Remove `path` and everything it owns. Returns `false` when there was
    /// nothing to delete.
    pub async fn delete_document(&self, path: &str) -> Result<bool> {
        let _guard = self.locks.lock(path.to_string()).await;
        match self.store.delete_document(path).await {
            Ok(()) => {
                tracing::info!(path, "document deleted");
                Ok(true)
            }
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn get_document(&self, path: &str) -> Result<Option<DocumentWithChunks>> {
        self.store.get_document(path).await
    }

    pub async fn get_statistics(&self) -> Result<StoreStats> {
        self.store.statistics().await
    }

    /// Run the configured chunker without touching storage.
    pub async fn preview_chunks(&self, text: &str) -> Result<Vec<ChunkDraft>> {
        self.chunker
            .chunk(
                text,
                self.options.max_chunk_size,
                self.options.overlap,
                &CancelToken::new(),
            )
            .await
    }

    /// Embed `query` and rank stored chunks.
    ///
    /// `metric` overrides the default metric; `model` selects which stored
    /// embeddings to rank (default: the embedder's model).
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        metric: Option<&dyn SimilarityMetric>,
        model: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        self.search_filtered(query, top_k, metric, model, None).await
    }

    /// [`search`](Self::search) restricted to candidates `filter` accepts.
    ///
    /// The filter runs before ranking, so `top_k` is filled from the
    /// candidates that remain.
    pub async fn search_filtered(
        &self,
        query: &str,
        top_k: usize,
        metric: Option<&dyn SimilarityMetric>,
        model: Option<&str>,
        filter: Option<&CandidateFilter<'_>>,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(Error::invalid_argument("top_k must be >= 1"));
        }
        let embedder = self.require_embedder()?;
        let vector = tokio::time::timeout(
            self.options.embed_timeout,
            embed_query(&**embedder, query),
        )
        .await
        .map_err(|_| Error::embedding("query embedding timed out"))??;

        let model = model.unwrap_or_else(|| embedder.model_name());
        self.search_vector(&vector, top_k, metric, model, filter)
            .await
    }

    /// Rank stored embeddings of `model` against a precomputed vector.
    pub async fn search_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        metric: Option<&dyn SimilarityMetric>,
        model: &str,
        filter: Option<&CandidateFilter<'_>>,
    ) -> Result<Vec<SearchHit>> {
        let mut candidates = self.store.iter_all_embeddings(model).await?;
        if let Some(keep) = filter {
            candidates.retain(|c| keep(c));
        }
        let metric = metric.unwrap_or_else(|| self.metric.as_ref());
        tracing::debug!(
            model,
            metric = metric.name(),
            candidates = candidates.len(),
            filtered = filter.is_some(),
            top_k,
            "searching"
        );
        Searcher::search(vector, candidates, metric, top_k)
    }

    /// Embed stored chunks that have no vector for the current model.
    ///
    /// Returns the number of embeddings written.
    pub async fn embed_missing(&self, limit: Option<usize>) -> Result<usize> {
        let embedder = self.require_embedder()?;
        let pending = self
            .store
            .chunks_missing_embeddings(embedder.model_name(), limit)
            .await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for batch in pending.chunks(self.options.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embed_batch(&**embedder, &texts).await?;
            let items: Vec<(i64, NewEmbedding)> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, v)| (chunk.id, NewEmbedding::new(v, embedder.model_name())))
                .collect();
            written += self.store.insert_embeddings(&items).await?;
        }
        tracing::info!(written, model = embedder.model_name(), "backfilled embeddings");
        Ok(written)
    }

    /// How many chunks lack a `model` embedding (capped at `limit`).
    pub async fn count_missing_embeddings(&self, model: &str, limit: Option<usize>) -> Result<usize> {
        Ok(self
            .store
            .chunks_missing_embeddings(model, limit)
            .await?
            .len())
    }

    fn require_embedder(&self) -> Result<&Arc<dyn Embedder>> {
        self.embedder
            .as_ref()
            .ok_or_else(|| Error::config("no embedding provider configured"))
    }

    /// Chunk, embed, then commit. Caller holds the path lock.
    async fn write_document(
        &self,
        path: &str,
        content: &str,
        timestamp: i64,
        metadata: serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<(i64, usize)> {
        let mut metadata = match metadata {
            serde_json::Value::Null => serde_json::Map::new(),
            serde_json::Value::Object(map) => map,
            other => {
                return Err(Error::invalid_argument(format!(
                    "document metadata must be a JSON object, got {}",
                    other
                )))
            }
        };
        metadata.insert("file_path".to_string(), serde_json::Value::from(path));

        let chunks = self
            .chunker
            .chunk(
                content,
                self.options.max_chunk_size,
                self.options.overlap,
                cancel,
            )
            .await?;
        cancel.check()?;

        let embeddings = self.embed_chunks(&chunks, cancel).await?;
        cancel.check()?;

        let doc = NewDocument {
            path: path.to_string(),
            timestamp,
            metadata: serde_json::Value::Object(metadata),
            content_hash: content_hash(content),
        };
        let document_id = self.store.commit_document(&doc, &chunks, &embeddings).await?;
        Ok((document_id, chunks.len()))
    }

    /// One vector per chunk, or none when no embedder is set.
    async fn embed_chunks(
        &self,
        chunks: &[ChunkDraft],
        cancel: &CancelToken,
    ) -> Result<Vec<NewEmbedding>> {
        let Some(embedder) = self.embedder.as_ref() else {
            return Ok(Vec::new());
        };

        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.options.batch_size.max(1)) {
            cancel.check()?;
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embed_batch(&**embedder, &texts).await?;
            embeddings.extend(
                vectors
                    .into_iter()
                    .map(|v| NewEmbedding::new(v, embedder.model_name())),
            );
        }
        Ok(embeddings)
    }

    /// One embedding call under the timeout, with count and size checks.
    async fn embed_batch(
        &self,
        embedder: &dyn Embedder,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let vectors = tokio::time::timeout(self.options.embed_timeout, embedder.embed(texts))
            .await
            .map_err(|_| {
                Error::embedding(format!(
                    "embedding batch of {} timed out after {:?}",
                    texts.len(),
                    self.options.embed_timeout
                ))
            })??;

        if vectors.len() != texts.len() {
            return Err(Error::embedding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        let dims = embedder.dims();
        if dims > 0 {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(Error::embedding(format!(
                    "embedder returned a {}-dimensional vector, expected {}",
                    bad.len(),
                    dims
                )));
            }
        }
        Ok(vectors)
    }
}

fn check_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(Error::invalid_argument("document path must not be empty"));
    }
    Ok(())
}
