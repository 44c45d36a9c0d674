//! SQLite-backed [`Store`] implementation.
//!
//! Every write that touches more than one row runs inside a single
//! transaction. Chunk and embedding cleanup relies on `ON DELETE CASCADE`,
//! which requires the pool to be opened with foreign keys enabled
//! (see [`db::connect`](crate::db::connect)).

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::chunk::content_hash;
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{
    Chunk, ChunkDraft, Document, DocumentWithChunks, EmbeddingCandidate, NewDocument,
    NewEmbedding, StoreStats,
};

use super::{validate_batch, validate_embeddings, Store};

pub struct SqliteStore {
    pool: SqlitePool,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open the database file, creating it and its schema if missing.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self {
            pool,
            db_path: Some(db_path.to_path_buf()),
        })
    }

    /// Wrap an existing pool. The schema must already exist.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            db_path: None,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

fn parse_metadata(raw: &str) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(raw)?)
}

async fn upsert_document_in(conn: &mut SqliteConnection, doc: &NewDocument) -> Result<i64> {
    let metadata_json = serde_json::to_string(&doc.metadata)?;
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO documents (path, timestamp, metadata_json, content_hash, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            timestamp = excluded.timestamp,
            metadata_json = excluded.metadata_json,
            content_hash = excluded.content_hash
        RETURNING id
        "#,
    )
    .bind(&doc.path)
    .bind(doc.timestamp)
    .bind(&metadata_json)
    .bind(&doc.content_hash)
    .bind(now_ts())
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

async fn replace_chunks_in(
    conn: &mut SqliteConnection,
    document_id: i64,
    chunks: &[ChunkDraft],
    embeddings: &[NewEmbedding],
) -> Result<()> {
    // Embeddings go with their chunks via ON DELETE CASCADE.
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *conn)
        .await?;

    let now = now_ts();
    for (i, chunk) in chunks.iter().enumerate() {
        let metadata_json = serde_json::to_string(&chunk.metadata)?;
        let chunk_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO chunks (document_id, chunk_index, start_pos, end_pos, content,
                                metadata_json, hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(document_id)
        .bind(i as i64)
        .bind(chunk.start as i64)
        .bind(chunk.end as i64)
        .bind(&chunk.text)
        .bind(&metadata_json)
        .bind(content_hash(&chunk.text))
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        if let Some(emb) = embeddings.get(i) {
            insert_embedding_in(conn, chunk_id, emb, now).await?;
        }
    }
    Ok(())
}

async fn insert_embedding_in(
    conn: &mut SqliteConnection,
    chunk_id: i64,
    emb: &NewEmbedding,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO embeddings (chunk_id, embedding, model_name, dimension, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id, model_name) DO UPDATE SET
            embedding = excluded.embedding,
            dimension = excluded.dimension,
            created_at = excluded.created_at
        "#,
    )
    .bind(chunk_id)
    .bind(vec_to_blob(&emb.vector))
    .bind(&emb.model)
    .bind(emb.dimension as i64)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let metadata_json: String = row.try_get("metadata_json")?;
    Ok(Chunk {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        chunk_index: row.try_get("chunk_index")?,
        start: row.try_get::<i64, _>("start_pos")? as usize,
        end: row.try_get::<i64, _>("end_pos")? as usize,
        text: row.try_get("content")?,
        metadata: parse_metadata(&metadata_json)?,
        hash: row.try_get("hash")?,
        created_at: row.try_get("created_at")?,
    })
}

const CHUNK_COLUMNS: &str = "id, document_id, chunk_index, start_pos, end_pos, content, \
                             metadata_json, hash, created_at";

#[async_trait]
impl Store for SqliteStore {
    async fn upsert_document(&self, doc: &NewDocument) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        upsert_document_in(&mut conn, doc).await
    }

    async fn replace_chunks(
        &self,
        document_id: i64,
        chunks: &[ChunkDraft],
        embeddings: &[NewEmbedding],
    ) -> Result<()> {
        validate_batch(chunks, embeddings)?;
        let mut tx = self.pool.begin().await?;
        replace_chunks_in(&mut tx, document_id, chunks, embeddings).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit_document(
        &self,
        doc: &NewDocument,
        chunks: &[ChunkDraft],
        embeddings: &[NewEmbedding],
    ) -> Result<i64> {
        validate_batch(chunks, embeddings)?;
        let mut tx = self.pool.begin().await?;
        let id = upsert_document_in(&mut tx, doc).await?;
        replace_chunks_in(&mut tx, id, chunks, embeddings).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn get_document_timestamp(&self, path: &str) -> Result<Option<i64>> {
        let ts: Option<i64> = sqlx::query_scalar("SELECT timestamp FROM documents WHERE path = ?")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ts)
    }

    async fn get_document(&self, path: &str) -> Result<Option<DocumentWithChunks>> {
        // Read both tables in one transaction so the chunk list matches the row.
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT id, path, timestamp, metadata_json, content_hash, created_at \
             FROM documents WHERE path = ?",
        )
        .bind(path)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let metadata_json: String = row.try_get("metadata_json")?;
        let document = Document {
            id: row.try_get("id")?,
            path: row.try_get("path")?,
            timestamp: row.try_get("timestamp")?,
            metadata: parse_metadata(&metadata_json)?,
            content_hash: row.try_get("content_hash")?,
            created_at: row.try_get("created_at")?,
        };

        let chunk_rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunks WHERE document_id = ? ORDER BY chunk_index ASC"
        ))
        .bind(document.id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let chunks = chunk_rows
            .iter()
            .map(row_to_chunk)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(DocumentWithChunks { document, chunks }))
    }

    async fn get_chunk(&self, chunk_id: i64) -> Result<Option<Chunk>> {
        let row = sqlx::query(&format!("SELECT {CHUNK_COLUMNS} FROM chunks WHERE id = ?"))
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_chunk).transpose()
    }

    async fn delete_document(&self, path: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM documents WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("document '{}'", path)));
        }
        Ok(())
    }

    async fn list_document_paths(&self) -> Result<Vec<String>> {
        let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM documents ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths)
    }

    async fn iter_all_embeddings(&self, model: &str) -> Result<Vec<EmbeddingCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT e.chunk_id, e.embedding, e.dimension,
                   c.document_id, c.chunk_index, c.content,
                   d.path, d.metadata_json
            FROM embeddings e
            JOIN chunks c ON c.id = e.chunk_id
            JOIN documents d ON d.id = c.document_id
            WHERE e.model_name = ?
            ORDER BY e.chunk_id ASC
            "#,
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk_id: i64 = row.try_get("chunk_id")?;
            let blob: Vec<u8> = row.try_get("embedding")?;
            let dimension: i64 = row.try_get("dimension")?;
            let vector = blob_to_vec(&blob);
            if blob.len() % 4 != 0 || vector.len() as i64 != dimension {
                return Err(Error::storage(format!(
                    "corrupt embedding for chunk {}: {} bytes, declared dimension {}",
                    chunk_id,
                    blob.len(),
                    dimension
                )));
            }
            let metadata_json: String = row.try_get("metadata_json")?;
            out.push(EmbeddingCandidate {
                chunk_id,
                document_id: row.try_get("document_id")?,
                document_path: row.try_get("path")?,
                chunk_index: row.try_get("chunk_index")?,
                text: row.try_get("content")?,
                vector,
                document_metadata: parse_metadata(&metadata_json)?,
            });
        }
        Ok(out)
    }

    async fn chunks_missing_embeddings(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Chunk>> {
        let limit_val = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.start_pos, c.end_pos, c.content,
                   c.metadata_json, c.hash, c.created_at
            FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model_name = ?
            WHERE e.id IS NULL
            ORDER BY c.document_id, c.chunk_index
            LIMIT ?
            "#,
        )
        .bind(model)
        .bind(limit_val)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_chunk).collect()
    }

    async fn insert_embeddings(&self, items: &[(i64, NewEmbedding)]) -> Result<usize> {
        validate_embeddings(items.iter().map(|(_, e)| e))?;
        let mut tx = self.pool.begin().await?;
        let now = now_ts();
        for (chunk_id, emb) in items {
            insert_embedding_in(&mut tx, *chunk_id, emb, now).await?;
        }
        tx.commit().await?;
        Ok(items.len())
    }

    async fn statistics(&self) -> Result<StoreStats> {
        let document_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            "SELECT model_name, COUNT(*) AS n FROM embeddings GROUP BY model_name ORDER BY model_name",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut embedding_counts: BTreeMap<String, i64> = BTreeMap::new();
        for row in &rows {
            embedding_counts.insert(row.try_get("model_name")?, row.try_get("n")?);
        }

        let database_size_bytes = self
            .db_path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(StoreStats {
            document_count,
            chunk_count,
            embedding_counts,
            database_path: self.db_path.as_ref().map(|p| p.display().to_string()),
            database_size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_temp() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    fn doc(path: &str, ts: i64) -> NewDocument {
        NewDocument {
            path: path.to_string(),
            timestamp: ts,
            metadata: serde_json::json!({ "file_path": path }),
            content_hash: content_hash(path),
        }
    }

    fn drafts(text: &str, parts: &[(usize, usize)]) -> Vec<ChunkDraft> {
        parts
            .iter()
            .map(|&(s, e)| ChunkDraft::from_span(text, s, e, serde_json::json!({ "chunk_index": s })))
            .collect()
    }

    #[tokio::test]
    async fn test_commit_and_get_document() {
        let (_tmp, store) = open_temp().await;
        let text = "alpha beta gamma";
        let chunks = drafts(text, &[(0, 6), (6, 16)]);
        let embs = vec![
            NewEmbedding::new(vec![1.0, 0.0], "m"),
            NewEmbedding::new(vec![0.0, 1.0], "m"),
        ];
        let id = store
            .commit_document(&doc("a.md", 10), &chunks, &embs)
            .await
            .unwrap();

        let got = store.get_document("a.md").await.unwrap().unwrap();
        assert_eq!(got.document.id, id);
        assert_eq!(got.document.timestamp, 10);
        assert_eq!(got.chunks.len(), 2);
        assert_eq!(got.chunks[1].text, "beta gamma");
        assert_eq!(got.chunks[1].chunk_index, 1);
        assert_eq!(got.chunks[1].start, 6);

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.embedding_counts.get("m"), Some(&2));
        assert!(stats.database_size_bytes > 0);
    }

    #[tokio::test]
    async fn test_upsert_keeps_id_and_replaces_chunks() {
        let (_tmp, store) = open_temp().await;
        let first = store
            .commit_document(&doc("a.md", 1), &drafts("one two", &[(0, 7)]), &[])
            .await
            .unwrap();
        let second = store
            .commit_document(
                &doc("a.md", 2),
                &drafts("three four", &[(0, 5), (5, 10)]),
                &[],
            )
            .await
            .unwrap();
        assert_eq!(first, second);

        let got = store.get_document("a.md").await.unwrap().unwrap();
        assert_eq!(got.document.timestamp, 2);
        assert_eq!(got.chunks.len(), 2);
        assert_eq!(store.get_document_timestamp("a.md").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (_tmp, store) = open_temp().await;
        let chunks = drafts("hello world", &[(0, 11)]);
        let embs = vec![NewEmbedding::new(vec![0.5, 0.5, 0.5], "m")];
        store
            .commit_document(&doc("a.md", 1), &chunks, &embs)
            .await
            .unwrap();

        store.delete_document("a.md").await.unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.document_count, 0);
        assert_eq!(stats.chunk_count, 0);
        assert!(stats.embedding_counts.is_empty());
        assert!(store.iter_all_embeddings("m").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let (_tmp, store) = open_temp().await;
        let err = store.delete_document("nope.md").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_old_batch() {
        let (_tmp, store) = open_temp().await;
        let id = store
            .commit_document(&doc("a.md", 1), &drafts("keep me", &[(0, 7)]), &[])
            .await
            .unwrap();

        let bad = vec![
            NewEmbedding::new(vec![1.0], "m"),
            NewEmbedding::new(vec![1.0, 2.0], "m"),
        ];
        let result = store
            .replace_chunks(id, &drafts("new text", &[(0, 3), (3, 8)]), &bad)
            .await;
        assert!(result.is_err());

        let got = store.get_document("a.md").await.unwrap().unwrap();
        assert_eq!(got.chunks.len(), 1);
        assert_eq!(got.chunks[0].text, "keep me");
    }

    #[tokio::test]
    async fn test_iter_embeddings_filters_by_model() {
        let (_tmp, store) = open_temp().await;
        let chunks = drafts("abc def", &[(0, 3), (3, 7)]);
        store
            .commit_document(
                &doc("a.md", 1),
                &chunks,
                &[
                    NewEmbedding::new(vec![1.0, 0.0], "m1"),
                    NewEmbedding::new(vec![0.0, 1.0], "m1"),
                ],
            )
            .await
            .unwrap();

        let missing = store.chunks_missing_embeddings("m2", None).await.unwrap();
        assert_eq!(missing.len(), 2);
        let items: Vec<(i64, NewEmbedding)> = missing
            .iter()
            .map(|c| (c.id, NewEmbedding::new(vec![1.0, 1.0, 1.0], "m2")))
            .collect();
        assert_eq!(store.insert_embeddings(&items).await.unwrap(), 2);

        let m1 = store.iter_all_embeddings("m1").await.unwrap();
        let m2 = store.iter_all_embeddings("m2").await.unwrap();
        assert_eq!(m1.len(), 2);
        assert_eq!(m2.len(), 2);
        assert_eq!(m2[0].vector.len(), 3);
        assert_eq!(m1[0].document_path, "a.md");
        assert_eq!(m1[0].document_metadata["file_path"], "a.md");
        assert!(store
            .chunks_missing_embeddings("m2", None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_storage_error() {
        let (_tmp, store) = open_temp().await;
        store
            .commit_document(
                &doc("a.md", 1),
                &drafts("abc", &[(0, 3)]),
                &[NewEmbedding::new(vec![1.0, 2.0], "m")],
            )
            .await
            .unwrap();
        sqlx::query("UPDATE embeddings SET dimension = 5")
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.iter_all_embeddings("m").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_list_paths_sorted() {
        let (_tmp, store) = open_temp().await;
        for p in ["c.md", "a.md", "b.md"] {
            store
                .commit_document(&doc(p, 1), &drafts("x", &[(0, 1)]), &[])
                .await
                .unwrap();
        }
        assert_eq!(
            store.list_document_paths().await.unwrap(),
            vec!["a.md", "b.md", "c.md"]
        );
        assert!(store.document_exists("b.md").await.unwrap());
        assert!(!store.document_exists("z.md").await.unwrap());
    }
}
