//! Text chunking.
//!
//! A [`Chunker`] turns a document body into ordered [`ChunkDraft`]s. Two
//! strategies ship:
//!
//! | Strategy | Type | Behaviour |
//! |----------|------|-----------|
//! | `simple` | [`SimpleChunker`] | fixed-size sliding window, no external calls |
//! | `assisted` | [`AssistedChunker`] | recursive splitting guided by a reasoning service |
//!
//! Sizes are expressed in estimated tokens (`chars / 4`). Offsets are byte
//! offsets into the body and always land on `char` boundaries.
//!
//! # Coverage
//!
//! Every successful result satisfies:
//!
//! ```text
//!   chunks[0].start == 0
//!   chunks[i+1].start <= chunks[i].end      (no gaps)
//!   chunks[last].end == text.len()
//!   chunks[i].text == text[start..end]
//! ```
//!
//! Overlap (`chunks[i+1].start < chunks[i].end`) appears only when the
//! caller asked the simple strategy for it.

pub mod assisted;
pub mod plan;
pub mod simple;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::models::ChunkDraft;

pub use assisted::{AssistedChunker, AssistedOptions};
pub use simple::SimpleChunker;

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Hex SHA-256 of `text`.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// What to do with a chunk that is still oversized after every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizePolicy {
    /// Cut it at whitespace boundaries until each piece fits.
    #[default]
    ForceSplit,
    /// Give up with a chunking error.
    Fail,
}

/// Cooperative cancellation flag shared between a caller and a running job.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
pub trait Chunker: Send + Sync {
    /// Short strategy name, recorded in chunk metadata and logs.
    fn name(&self) -> &str;

    /// Split `text` into chunks of at most `max_chunk_size` estimated tokens.
    ///
    /// `overlap` is honoured by strategies that support it and ignored by
    /// the rest. Empty input yields no chunks.
    async fn chunk(
        &self,
        text: &str,
        max_chunk_size: usize,
        overlap: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<ChunkDraft>>;
}

/// Verify the coverage law for `chunks` over `text`.
///
/// Returns a description of the first violation found.
pub fn verify_coverage(text: &str, chunks: &[ChunkDraft]) -> std::result::Result<(), String> {
    if text.is_empty() {
        return if chunks.is_empty() {
            Ok(())
        } else {
            Err("chunks produced for empty text".to_string())
        };
    }
    let Some(first) = chunks.first() else {
        return Err("no chunks for non-empty text".to_string());
    };
    if first.start != 0 {
        return Err(format!("first chunk starts at {}", first.start));
    }
    let mut prev_end = 0;
    for (i, c) in chunks.iter().enumerate() {
        if c.end <= c.start {
            return Err(format!("chunk {} has empty span", i));
        }
        if i > 0 && c.start > prev_end {
            return Err(format!("gap [{}, {}) before chunk {}", prev_end, c.start, i));
        }
        if text.get(c.start..c.end) != Some(c.text.as_str()) {
            return Err(format!("chunk {} text does not match its span", i));
        }
        prev_end = prev_end.max(c.end);
    }
    if prev_end != text.len() {
        return Err(format!("text after {} is not covered", prev_end));
    }
    Ok(())
}

/// Largest char boundary `<= idx`.
pub(crate) fn floor_char_boundary(text: &str, idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    let mut i = idx;
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Cut `text[start..end]` into contiguous pieces of at most `max_tokens`.
///
/// Cuts prefer the last newline, then the last space, inside each window.
/// A window with no whitespace is cut at the window edge.
pub(crate) fn hard_split(text: &str, start: usize, end: usize, max_tokens: usize) -> Vec<(usize, usize)> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces = Vec::new();
    let mut cursor = start;

    while cursor < end {
        let remaining = &text[cursor..end];
        // Byte offset of the window edge, measured in chars.
        let window = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());

        let cut = if window < remaining.len() {
            remaining[..window]
                .rfind('\n')
                .or_else(|| remaining[..window].rfind(' '))
                .map(|pos| pos + 1)
                .unwrap_or(window)
        } else {
            window
        };

        pieces.push((cursor, cursor + cut));
        cursor += cut;
    }
    pieces
}

/// Stamp 0-based `chunk_index` into each draft's metadata.
pub(crate) fn number_chunks(chunks: &mut [ChunkDraft]) {
    for (i, c) in chunks.iter_mut().enumerate() {
        if let Some(obj) = c.metadata.as_object_mut() {
            obj.insert("chunk_index".to_string(), serde_json::json!(i));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spans_to_drafts(text: &str, spans: &[(usize, usize)]) -> Vec<ChunkDraft> {
        spans
            .iter()
            .map(|&(s, e)| ChunkDraft::from_span(text, s, e, serde_json::json!({})))
            .collect()
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcdefg"), 1);
        // Counted in chars, not bytes.
        assert_eq!(estimate_tokens("éééé"), 1);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        let clone = token.clone();
        clone.cancel();
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_verify_coverage() {
        let text = "hello world";
        assert!(verify_coverage(text, &spans_to_drafts(text, &[(0, 5), (5, 11)])).is_ok());
        assert!(verify_coverage(text, &spans_to_drafts(text, &[(0, 7), (4, 11)])).is_ok());
        assert!(verify_coverage(text, &spans_to_drafts(text, &[(0, 4), (5, 11)])).is_err());
        assert!(verify_coverage(text, &spans_to_drafts(text, &[(1, 11)])).is_err());
        assert!(verify_coverage(text, &spans_to_drafts(text, &[(0, 10)])).is_err());
        assert!(verify_coverage("", &[]).is_ok());
    }

    #[test]
    fn test_hard_split_prefers_whitespace() {
        let text = "aaaa bbbb cccc dddd";
        // 2 tokens = 8 chars per piece.
        let pieces = hard_split(text, 0, text.len(), 2);
        assert_eq!(pieces[0], (0, 5));
        let joined: String = pieces.iter().map(|&(s, e)| &text[s..e]).collect();
        assert_eq!(joined, text);
        for &(s, e) in &pieces {
            assert!(text[s..e].chars().count() <= 8);
        }
    }

    #[test]
    fn test_hard_split_without_whitespace() {
        let text = "x".repeat(20);
        let pieces = hard_split(&text, 0, 20, 1);
        assert_eq!(pieces.len(), 5);
        assert!(pieces.iter().all(|&(s, e)| e - s == 4));
    }

    #[test]
    fn test_hard_split_multibyte() {
        let text = "ééééééééé";
        let pieces = hard_split(text, 0, text.len(), 1);
        for &(s, e) in &pieces {
            assert!(text.is_char_boundary(s) && text.is_char_boundary(e));
        }
        assert_eq!(pieces.last().unwrap().1, text.len());
    }

    #[test]
    fn test_floor_char_boundary() {
        let text = "aé";
        assert_eq!(floor_char_boundary(text, 2), 1);
        assert_eq!(floor_char_boundary(text, 10), 3);
    }
}
