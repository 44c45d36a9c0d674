//! Core data models used throughout docvec.
//!
//! These types represent the documents, chunks, embeddings, and search
//! hits that flow through the chunk → embed → store → search pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// A document as handed to the store for insertion or replacement.
#[derive(Debug, Clone)]
pub struct NewDocument {
    /// Unique key of the document (its source path).
    pub path: String,
    /// Caller-supplied version stamp, compared for staleness.
    pub timestamp: i64,
    pub metadata: serde_json::Value,
    /// SHA-256 of the document body.
    pub content_hash: String,
}

/// A stored document row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: i64,
    pub path: String,
    pub timestamp: i64,
    pub metadata: serde_json::Value,
    pub content_hash: String,
    pub created_at: i64,
}

/// A chunk produced by a chunker, not yet persisted.
///
/// `start` and `end` are byte offsets into the source text and always fall
/// on `char` boundaries, so `&text[start..end] == self.text`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkDraft {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub metadata: serde_json::Value,
}

impl ChunkDraft {
    /// Build a draft by slicing `source[start..end]`.
    pub fn from_span(source: &str, start: usize, end: usize, metadata: serde_json::Value) -> Self {
        Self {
            text: source[start..end].to_string(),
            start,
            end,
            metadata,
        }
    }
}

/// A persisted chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub metadata: serde_json::Value,
    pub hash: String,
    pub created_at: i64,
}

/// An embedding to be written alongside a chunk.
///
/// `dimension` is the declared size; the store rejects any vector whose
/// length disagrees with it.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmbedding {
    pub vector: Vec<f32>,
    pub model: String,
    pub dimension: usize,
}

impl NewEmbedding {
    pub fn new(vector: Vec<f32>, model: impl Into<String>) -> Self {
        let dimension = vector.len();
        Self {
            vector,
            model: model.into(),
            dimension,
        }
    }
}

/// A document together with its ordered chunks.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentWithChunks {
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

/// A chunk vector plus the fields needed to build a [`SearchHit`] without
/// another round-trip to storage.
#[derive(Debug, Clone)]
pub struct EmbeddingCandidate {
    pub chunk_id: i64,
    pub document_id: i64,
    pub document_path: String,
    pub chunk_index: i64,
    pub text: String,
    pub vector: Vec<f32>,
    pub document_metadata: serde_json::Value,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    /// 1-based position in the result list.
    pub rank: usize,
    pub score: f32,
    pub chunk_id: i64,
    pub document_id: i64,
    pub document_path: String,
    pub chunk_index: i64,
    pub text: String,
    pub document_metadata: serde_json::Value,
}

/// Store-wide counts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub document_count: i64,
    pub chunk_count: i64,
    /// Embedding count per model name.
    pub embedding_counts: BTreeMap<String, i64>,
    pub database_path: Option<String>,
    pub database_size_bytes: u64,
}

/// Policy applied when adding a document whose path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Refuse with [`Error::DocumentExists`].
    Error,
    /// Leave the stored document untouched.
    Skip,
    /// Replace only when the new timestamp is strictly greater.
    #[default]
    UpdateIfNewer,
    /// Always replace.
    Force,
}

impl FromStr for UpdateMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "error" => Ok(Self::Error),
            "skip" => Ok(Self::Skip),
            "update_if_newer" => Ok(Self::UpdateIfNewer),
            "force" => Ok(Self::Force),
            other => Err(Error::invalid_argument(format!(
                "unknown update mode '{}': expected error, skip, update_if_newer, or force",
                other
            ))),
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Skip => "skip",
            Self::UpdateIfNewer => "update_if_newer",
            Self::Force => "force",
        };
        f.write_str(s)
    }
}

/// Result of a single add/update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added { document_id: i64, chunks: usize },
    Updated { document_id: i64, chunks: usize },
    Skipped,
}

impl AddOutcome {
    pub fn chunks_written(&self) -> usize {
        match self {
            Self::Added { chunks, .. } | Self::Updated { chunks, .. } => *chunks,
            Self::Skipped => 0,
        }
    }
}

/// Per-run summary for batch operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub chunks_written: u64,
    pub pruned: u64,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn record(&mut self, outcome: &AddOutcome) {
        match outcome {
            AddOutcome::Skipped => self.skipped += 1,
            _ => {
                self.processed += 1;
                self.chunks_written += outcome.chunks_written() as u64;
            }
        }
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_mode_parse_and_display() {
        for name in ["error", "skip", "update_if_newer", "force"] {
            let mode: UpdateMode = name.parse().unwrap();
            assert_eq!(mode.to_string(), name);
        }
        assert!("sometimes".parse::<UpdateMode>().is_err());
        assert_eq!(UpdateMode::default(), UpdateMode::UpdateIfNewer);
    }

    #[test]
    fn test_chunk_draft_from_span() {
        let text = "héllo world";
        let draft = ChunkDraft::from_span(text, 0, 6, serde_json::json!({}));
        assert_eq!(draft.text, "héllo");
        assert_eq!(draft.end, 6);
    }

    #[test]
    fn test_run_stats_record() {
        let mut stats = RunStats::default();
        stats.record(&AddOutcome::Added {
            document_id: 1,
            chunks: 3,
        });
        stats.record(&AddOutcome::Updated {
            document_id: 2,
            chunks: 2,
        });
        stats.record(&AddOutcome::Skipped);
        stats.record_error();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.chunks_written, 5);
    }
}
