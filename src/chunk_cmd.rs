//! `docvec chunk <file>`: preview chunk spans as JSON without writing.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::chunk::{estimate_tokens, CancelToken};
use crate::config::Config;
use crate::models::ChunkDraft;
use crate::vector_db::build_chunker;

#[derive(Debug, Serialize)]
struct ChunkPreview<'a> {
    index: usize,
    start: usize,
    end: usize,
    tokens: usize,
    metadata: &'a serde_json::Value,
    text: &'a str,
}

pub async fn run_chunk(
    config: &Config,
    file: &Path,
    max_chunk_size: Option<usize>,
    overlap: Option<usize>,
) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let max_chunk_size = max_chunk_size.unwrap_or(config.chunking.max_chunk_size);
    let overlap = overlap.unwrap_or(config.chunking.overlap);

    let chunker = build_chunker(config)?;
    tracing::debug!(
        strategy = chunker.name(),
        max_chunk_size,
        overlap,
        "previewing chunks"
    );
    let chunks = chunker
        .chunk(&text, max_chunk_size, overlap, &CancelToken::new())
        .await?;

    println!("{}", render_preview(&chunks)?);
    Ok(())
}

fn render_preview(chunks: &[ChunkDraft]) -> Result<String> {
    let previews: Vec<ChunkPreview<'_>> = chunks
        .iter()
        .enumerate()
        .map(|(index, c)| ChunkPreview {
            index,
            start: c.start,
            end: c.end,
            tokens: estimate_tokens(&c.text),
            metadata: &c.metadata,
            text: &c.text,
        })
        .collect();
    Ok(serde_json::to_string_pretty(&previews)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SimpleChunker;

    #[test]
    fn test_preview_is_json_array_of_spans() {
        let text = "one two three four five six seven";
        let chunks = SimpleChunker.split(text, 2, 0).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&render_preview(&chunks).unwrap()).unwrap();
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), chunks.len());
        assert_eq!(arr[0]["start"], 0);
        assert_eq!(arr[0]["end"], 8);
        assert_eq!(arr[0]["text"], "one two ");
        assert_eq!(arr[0]["tokens"], 2);
    }
}
