//! Fixed-size sliding-window chunker.

use async_trait::async_trait;

use super::{number_chunks, CancelToken, Chunker, CHARS_PER_TOKEN};
use crate::error::{Error, Result};
use crate::models::ChunkDraft;

/// Deterministic window of `max_chunk_size × 4` chars, advancing by
/// `(max_chunk_size − overlap) × 4` chars. Never calls out.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleChunker;

impl SimpleChunker {
    pub fn new() -> Self {
        Self
    }

    /// The windowing itself, usable without a runtime.
    pub fn split(&self, text: &str, max_chunk_size: usize, overlap: usize) -> Result<Vec<ChunkDraft>> {
        if max_chunk_size == 0 {
            return Err(Error::invalid_argument("max_chunk_size must be > 0"));
        }
        if overlap >= max_chunk_size {
            return Err(Error::invalid_argument(format!(
                "overlap ({}) must be smaller than max_chunk_size ({})",
                overlap, max_chunk_size
            )));
        }
        if text.is_empty() {
            return Ok(Vec::new());
        }

        // Byte offset of every char, plus the end of the text.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let n_chars = bounds.len() - 1;
        let window = max_chunk_size * CHARS_PER_TOKEN;
        let step = (max_chunk_size - overlap) * CHARS_PER_TOKEN;

        let mut chunks = Vec::new();
        let mut start_c = 0;
        loop {
            let end_c = (start_c + window).min(n_chars);
            let (start, end) = (bounds[start_c], bounds[end_c]);
            let char_count = end_c - start_c;
            chunks.push(ChunkDraft::from_span(
                text,
                start,
                end,
                serde_json::json!({
                    "type": "fixed-size",
                    "strategy": "simple",
                    "char_count": char_count,
                    "token_estimate": char_count / CHARS_PER_TOKEN,
                }),
            ));
            if end_c == n_chars {
                break;
            }
            start_c += step;
        }

        number_chunks(&mut chunks);
        Ok(chunks)
    }
}

#[async_trait]
impl Chunker for SimpleChunker {
    fn name(&self) -> &str {
        "simple"
    }

    async fn chunk(
        &self,
        text: &str,
        max_chunk_size: usize,
        overlap: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<ChunkDraft>> {
        cancel.check()?;
        self.split(text, max_chunk_size, overlap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{estimate_tokens, verify_coverage};

    #[test]
    fn test_small_text_single_chunk() {
        let text = "Hello world. This is a test.";
        let chunks = SimpleChunker.split(text, 1000, 0).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start, 0);
        assert_eq!(chunks[0].end, text.len());
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].metadata["chunk_index"], 0);
        assert_eq!(chunks[0].metadata["strategy"], "simple");
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(SimpleChunker.split("", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(matches!(
            SimpleChunker.split("abc", 0, 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            SimpleChunker.split("abc", 5, 5),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_windows_without_overlap_tile_the_text() {
        let text = "abcdefghijklmnopqrstuvwxyz0123456789";
        let chunks = SimpleChunker.split(text, 2, 0).unwrap();
        // 8-char windows over 36 chars.
        assert_eq!(chunks.len(), 5);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        verify_coverage(text, &chunks).unwrap();
        for c in &chunks {
            assert!(estimate_tokens(&c.text) <= 2);
        }
    }

    #[test]
    fn test_overlap_shares_chars() {
        let text = "x".repeat(40);
        let chunks = SimpleChunker.split(&text, 4, 1).unwrap();
        // window 16, step 12: starts at 0, 12, 24 (24+16 = 40 ends it).
        let starts: Vec<usize> = chunks.iter().map(|c| c.start).collect();
        assert_eq!(starts, vec![0, 12, 24]);
        assert_eq!(chunks[0].end - chunks[1].start, 4);
        verify_coverage(&text, &chunks).unwrap();
    }

    #[test]
    fn test_multibyte_offsets_are_char_boundaries() {
        let text = "日本語のテキストを分割します。".repeat(3);
        let chunks = SimpleChunker.split(&text, 1, 0).unwrap();
        for c in &chunks {
            assert!(text.is_char_boundary(c.start));
            assert!(text.is_char_boundary(c.end));
            assert!(c.text.chars().count() <= 4);
        }
        verify_coverage(&text, &chunks).unwrap();
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let a = SimpleChunker.split(text, 3, 1).unwrap();
        let b = SimpleChunker.split(text, 3, 1).unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = SimpleChunker.chunk("abc", 10, 0, &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
