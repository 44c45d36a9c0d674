//! Top-k similarity search over stored chunk embeddings.
//!
//! [`Searcher::search`] is a pure function over a candidate snapshot:
//!
//! ```text
//! query vector ──┐
//!                ├─▶ score every candidate ─▶ sort ─▶ truncate(top_k) ─▶ rank 1..k
//! candidates ────┘   (skip dimension mismatch)
//! ```
//!
//! Ordering is score descending, then chunk id ascending, so equal scores
//! come back in a stable order. NaN scores sort after every real score.
//!
//! [`run_search`] is the `docvec search` command: it embeds the query
//! through [`VectorDb`](crate::vector_db::VectorDb) and prints ranked hits.
//! A [`SearchFilter`] narrows the candidates by path prefix or document
//! metadata before ranking.

use anyhow::{bail, Result as AnyResult};
use std::cmp::Ordering;
use std::path::Path;

use crate::config::Config;
use crate::connector_fs::document_key;
use crate::error::{Error, Result};
use crate::models::{EmbeddingCandidate, SearchHit};
use crate::similarity::{metric_from_name, SimilarityMetric};
use crate::vector_db::VectorDb;

/// Predicate over search candidates. Returning `false` drops the candidate
/// before ranking.
pub type CandidateFilter<'a> = dyn Fn(&EmbeddingCandidate) -> bool + Send + Sync + 'a;

/// Brute-force ranker over an in-memory candidate set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Searcher;

impl Searcher {
    /// Score `candidates` against `query` and return the best `top_k`,
    /// ranked from 1.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when `top_k` is zero.
    pub fn search(
        query: &[f32],
        candidates: Vec<EmbeddingCandidate>,
        metric: &dyn SimilarityMetric,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Err(Error::invalid_argument("top_k must be >= 1"));
        }

        let mut skipped = 0usize;
        let mut scored: Vec<(f32, EmbeddingCandidate)> = candidates
            .into_iter()
            .filter_map(|c| {
                if c.vector.len() != query.len() {
                    skipped += 1;
                    return None;
                }
                Some((metric.score(query, &c.vector), c))
            })
            .collect();

        if skipped > 0 {
            tracing::warn!(
                skipped,
                query_dims = query.len(),
                "skipped embeddings with mismatched dimension"
            );
        }

        scored.sort_by(|(sa, a), (sb, b)| {
            compare_scores(*sa, *sb).then(a.chunk_id.cmp(&b.chunk_id))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, (score, c))| SearchHit {
                rank: i + 1,
                score,
                chunk_id: c.chunk_id,
                document_id: c.document_id,
                document_path: c.document_path,
                chunk_index: c.chunk_index,
                text: c.text,
                document_metadata: c.document_metadata,
            })
            .collect())
    }
}

/// Descending by score with NaN last.
fn compare_scores(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
    }
}

/// Candidate restrictions for `docvec search`. All conditions must hold.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Keep documents whose stored path starts with this.
    pub path_prefix: Option<String>,
    /// Keep documents whose metadata has every `key = value`.
    pub metadata: Vec<(String, String)>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.path_prefix.is_none() && self.metadata.is_empty()
    }

    pub fn matches(&self, candidate: &EmbeddingCandidate) -> bool {
        if let Some(ref prefix) = self.path_prefix {
            if !candidate.document_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        self.metadata.iter().all(|(key, expected)| {
            match candidate.document_metadata.get(key) {
                Some(serde_json::Value::String(s)) => s == expected,
                Some(other) => other.to_string() == *expected,
                None => false,
            }
        })
    }
}

/// Parse a `key=value` metadata condition.
pub fn parse_meta_pair(raw: &str) -> AnyResult<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("invalid metadata filter '{}': expected key=value", raw),
    }
}

/// A prefix naming an existing file or directory is matched in its
/// absolute form, the way sync stores keys.
pub fn resolve_path_prefix(prefix: &str) -> String {
    let path = Path::new(prefix);
    if path.exists() {
        document_key(path)
    } else {
        prefix.to_string()
    }
}

/// How `docvec search` prints each hit.
#[derive(Debug, Clone)]
pub struct SearchDisplay {
    pub show_metadata: bool,
    /// Excerpt length in characters.
    pub max_content_length: usize,
}

impl Default for SearchDisplay {
    fn default() -> Self {
        Self {
            show_metadata: false,
            max_content_length: 160,
        }
    }
}

/// `docvec search`: embed `query`, rank stored chunks, print the hits.
pub async fn run_search(
    config: &Config,
    query: &str,
    metric: Option<&str>,
    limit: Option<usize>,
    model: Option<&str>,
    filter: &SearchFilter,
    display: &SearchDisplay,
) -> AnyResult<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let metric = metric.map(metric_from_name).transpose()?;
    let top_k = limit.unwrap_or(config.retrieval.top_k);
    let keep = |c: &EmbeddingCandidate| filter.matches(c);
    let predicate: Option<&CandidateFilter<'_>> = if filter.is_empty() {
        None
    } else {
        Some(&keep)
    };

    let db = VectorDb::from_config(config).await?;
    let hits = db
        .search_filtered(query, top_k, metric.as_deref(), model, predicate)
        .await;
    db.store().close().await;
    let hits = hits?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for hit in &hits {
        print!("{}", render_hit(hit, display));
    }

    Ok(())
}

fn render_hit(hit: &SearchHit, display: &SearchDisplay) -> String {
    let mut out = format!(
        "{}. [{:.4}] {} #{}\n",
        hit.rank, hit.score, hit.document_path, hit.chunk_index
    );
    out.push_str(&format!(
        "    excerpt: \"{}\"\n",
        excerpt(&hit.text, display.max_content_length)
    ));
    if display.show_metadata {
        out.push_str(&format!("    metadata: {}\n", hit.document_metadata));
    }
    out.push_str(&format!("    chunk: {}\n\n", hit.chunk_id));
    out
}

/// First `max_chars` chars of `text` on one line.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
