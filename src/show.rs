//! Document retrieval by path, for `docvec show`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::ingest::resolve_key;
use crate::models::DocumentWithChunks;
use crate::vector_db::VectorDb;

/// Fetch the document stored under `path` (or under its absolute form).
pub async fn run_show(config: &Config, path: &str, json: bool) -> Result<()> {
    let db = VectorDb::from_config(config).await?;
    let found = match resolve_key(db.store(), path).await {
        Ok(key) => db.get_document(&key).await.map_err(anyhow::Error::from),
        Err(e) => Err(e),
    };
    db.store().close().await;

    let Some(doc) = found? else {
        bail!("document not found: {}", path);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print!("{}", render_document(&doc));
    }
    Ok(())
}

fn render_document(doc: &DocumentWithChunks) -> String {
    let d = &doc.document;
    let mut out = String::new();
    out.push_str("--- Document ---\n");
    out.push_str(&format!("id:           {}\n", d.id));
    out.push_str(&format!("path:         {}\n", d.path));
    out.push_str(&format!("timestamp:    {}\n", d.timestamp));
    out.push_str(&format!("created_at:   {}\n", format_ts_iso(d.created_at)));
    out.push_str(&format!("content_hash: {}\n", d.content_hash));
    out.push_str(&format!("metadata:     {}\n\n", d.metadata));

    out.push_str(&format!("--- Chunks ({}) ---\n", doc.chunks.len()));
    for chunk in &doc.chunks {
        out.push_str(&format!(
            "[chunk {}] bytes {}..{}\n{}\n\n",
            chunk.chunk_index, chunk.start, chunk.end, chunk.text
        ));
    }
    out
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, Document};

    #[test]
    fn test_render_document() {
        let doc = DocumentWithChunks {
            document: Document {
                id: 7,
                path: "/notes/a.md".to_string(),
                timestamp: 42,
                metadata: serde_json::json!({"filename": "a.md"}),
                content_hash: "abc".to_string(),
                created_at: 0,
            },
            chunks: vec![Chunk {
                id: 1,
                document_id: 7,
                chunk_index: 0,
                start: 0,
                end: 5,
                text: "hello".to_string(),
                metadata: serde_json::json!({}),
                hash: "h".to_string(),
                created_at: 0,
            }],
        };
        let out = render_document(&doc);
        assert!(out.contains("path:         /notes/a.md"));
        assert!(out.contains("created_at:   1970-01-01T00:00:00Z"));
        assert!(out.contains("--- Chunks (1) ---"));
        assert!(out.contains("[chunk 0] bytes 0..5\nhello"));
    }
}
