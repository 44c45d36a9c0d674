//! Recursive chunker guided by an external reasoning service.
//!
//! ```text
//!              chunk_range(text, offset, depth)
//!                          │
//!          fits max_chunk_size? ──yes──▶ one chunk, no call
//!                          │ no
//!      ≤ max_direct_tokens? ──yes──▶ ask for a JSON plan ─┐
//!                          │ no                           │ validate, retry
//!          ask for a split point near the middle          │ with feedback
//!                          │                              ▼
//!        recurse on [0, at) and [at, len) with depth + 1  exhausted?
//!                                                         │
//!                    oversize only ─▶ force split / fail  │
//!                    otherwise     ─▶ simple fallback / error
//! ```
//!
//! Every call to the service runs under `call_timeout`; a timeout counts as
//! a failed attempt. Offsets of the right half are shifted by the split
//! point, so every returned span is absolute.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use super::plan::{self, IssueKind, PlanIssue, PlanRejection, PlannedSpan};
use super::{
    estimate_tokens, hard_split, number_chunks, CancelToken, Chunker, OversizePolicy,
    SimpleChunker,
};
use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::models::ChunkDraft;
use crate::reasoning::ReasoningService;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct AssistedOptions {
    /// Above this estimate the text is split in two before planning.
    pub max_direct_tokens: usize,
    /// Plans with chunks smaller than this are sent back; 0 disables the check.
    pub min_chunk_size: usize,
    /// Corrective retries after the first attempt.
    pub max_retries: u32,
    pub max_depth: u32,
    /// Use the simple chunker once retries are exhausted.
    pub fallback: bool,
    pub oversize_policy: OversizePolicy,
    pub call_timeout: Duration,
}

impl Default for AssistedOptions {
    fn default() -> Self {
        Self::from(&ChunkingConfig::default())
    }
}

impl From<&ChunkingConfig> for AssistedOptions {
    fn from(config: &ChunkingConfig) -> Self {
        Self {
            max_direct_tokens: config.max_direct_tokens,
            min_chunk_size: config.min_chunk_size,
            max_retries: config.max_retries,
            max_depth: config.max_depth,
            fallback: config.fallback,
            oversize_policy: config.oversize_policy,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }
}

pub struct AssistedChunker {
    reasoner: Arc<dyn ReasoningService>,
    options: AssistedOptions,
}

impl AssistedChunker {
    pub fn new(reasoner: Arc<dyn ReasoningService>, options: AssistedOptions) -> Self {
        Self { reasoner, options }
    }

    pub fn options(&self) -> &AssistedOptions {
        &self.options
    }

    async fn ask(&self, prompt: String) -> Result<String> {
        match tokio::time::timeout(self.options.call_timeout, self.reasoner.complete(&prompt)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::reasoning(format!(
                "no response within {:?}",
                self.options.call_timeout
            ))),
        }
    }

    fn chunk_range<'a>(
        &'a self,
        text: &'a str,
        offset: usize,
        max_chunk_size: usize,
        overlap: usize,
        depth: u32,
        cancel: &'a CancelToken,
    ) -> BoxFuture<'a, Result<Vec<ChunkDraft>>> {
        Box::pin(async move {
            cancel.check()?;

            let tokens = estimate_tokens(text);
            if tokens <= max_chunk_size {
                return Ok(vec![ChunkDraft {
                    text: text.to_string(),
                    start: offset,
                    end: offset + text.len(),
                    metadata: serde_json::json!({ "strategy": "assisted", "type": "whole" }),
                }]);
            }
            if text.trim().is_empty() {
                return simple_range(text, offset, max_chunk_size, overlap);
            }

            if tokens <= self.options.max_direct_tokens {
                self.plan_direct(text, offset, max_chunk_size, overlap, cancel)
                    .await
            } else if depth >= self.options.max_depth {
                self.give_up(
                    text,
                    offset,
                    max_chunk_size,
                    overlap,
                    format!("maximum split depth {} reached", self.options.max_depth),
                )
            } else {
                self.split_in_two(text, offset, max_chunk_size, overlap, depth, cancel)
                    .await
            }
        })
    }

    async fn plan_direct(
        &self,
        text: &str,
        offset: usize,
        max_chunk_size: usize,
        overlap: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<ChunkDraft>> {
        let mut feedback: Option<String> = None;
        let mut rejection: Option<PlanRejection> = None;
        let attempts = self.options.max_retries + 1;

        for attempt in 1..=attempts {
            cancel.check()?;
            let prompt = plan::direct_prompt(text, max_chunk_size, feedback.as_deref());
            let response = match self.ask(prompt).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(attempt, offset, error = %e, "chunk plan request failed");
                    continue;
                }
            };

            match plan::evaluate_plan(text, &response, max_chunk_size, self.options.min_chunk_size)
            {
                Ok(spans) => {
                    tracing::debug!(attempt, offset, chunks = spans.len(), "chunk plan accepted");
                    return Ok(spans_to_drafts(text, offset, spans));
                }
                Err(rej) => {
                    tracing::warn!(
                        attempt,
                        offset,
                        issues = rej.issues.len(),
                        "chunk plan rejected"
                    );
                    feedback = Some(plan::feedback_report(&rej.issues));
                    rejection = Some(rej);
                }
            }
        }

        if let Some(rej) = rejection.filter(|r| r.only_oversize()) {
            let spans = rej.spans.unwrap_or_default();
            return match self.options.oversize_policy {
                OversizePolicy::ForceSplit => {
                    tracing::info!(offset, "force-splitting oversize chunks");
                    Ok(force_split(text, offset, spans, max_chunk_size))
                }
                OversizePolicy::Fail => Err(Error::chunking(format!(
                    "chunk plan still has oversize chunks after {} attempts",
                    attempts
                ))),
            };
        }

        self.give_up(
            text,
            offset,
            max_chunk_size,
            overlap,
            format!("no valid chunk plan after {} attempts", attempts),
        )
    }

    async fn split_in_two(
        &self,
        text: &str,
        offset: usize,
        max_chunk_size: usize,
        overlap: usize,
        depth: u32,
        cancel: &CancelToken,
    ) -> Result<Vec<ChunkDraft>> {
        let mut feedback: Option<String> = None;
        let attempts = self.options.max_retries + 1;

        for attempt in 1..=attempts {
            cancel.check()?;
            let prompt = plan::split_prompt(text, feedback.as_deref());
            let response = match self.ask(prompt).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(attempt, offset, depth, error = %e, "split request failed");
                    continue;
                }
            };

            let Some(snippet) = plan::parse_split_point(&response) else {
                feedback = Some(plan::feedback_report(&[PlanIssue::new(
                    IssueKind::MalformedResponse,
                    "the answer did not contain a BEGIN_SPLIT_POINT ... END_SPLIT_POINT block",
                )]));
                continue;
            };
            let Some(at) = plan::locate_split(text, &snippet) else {
                feedback = Some(plan::feedback_report(&[PlanIssue::new(
                    IssueKind::UnlocatableMarkers,
                    format!(
                        "\"{}\" does not appear verbatim in the document, or splitting there leaves one half empty",
                        snippet
                    ),
                )]));
                continue;
            };

            tracing::debug!(offset, depth, at, "splitting text");
            let mut left = self
                .chunk_range(&text[..at], offset, max_chunk_size, overlap, depth + 1, cancel)
                .await?;
            let right = self
                .chunk_range(
                    &text[at..],
                    offset + at,
                    max_chunk_size,
                    overlap,
                    depth + 1,
                    cancel,
                )
                .await?;
            left.extend(right);
            return Ok(left);
        }

        self.give_up(
            text,
            offset,
            max_chunk_size,
            overlap,
            format!("no usable split point after {} attempts", attempts),
        )
    }

    fn give_up(
        &self,
        text: &str,
        offset: usize,
        max_chunk_size: usize,
        overlap: usize,
        reason: String,
    ) -> Result<Vec<ChunkDraft>> {
        if !self.options.fallback {
            return Err(Error::chunking(reason));
        }
        tracing::info!(offset, reason = %reason, "falling back to simple chunking");
        simple_range(text, offset, max_chunk_size, overlap)
    }
}

/// Simple windows over `text`, shifted to absolute offsets.
fn simple_range(
    text: &str,
    offset: usize,
    max_chunk_size: usize,
    overlap: usize,
) -> Result<Vec<ChunkDraft>> {
    let mut drafts = SimpleChunker.split(text, max_chunk_size, overlap)?;
    for d in &mut drafts {
        d.start += offset;
        d.end += offset;
        if let Some(obj) = d.metadata.as_object_mut() {
            obj.insert("fallback".to_string(), serde_json::json!(true));
        }
    }
    Ok(drafts)
}

fn spans_to_drafts(text: &str, offset: usize, spans: Vec<PlannedSpan>) -> Vec<ChunkDraft> {
    spans
        .into_iter()
        .map(|s| ChunkDraft {
            text: text[s.start..s.end].to_string(),
            start: offset + s.start,
            end: offset + s.end,
            metadata: s.metadata,
        })
        .collect()
}

fn force_split(
    text: &str,
    offset: usize,
    spans: Vec<PlannedSpan>,
    max_chunk_size: usize,
) -> Vec<ChunkDraft> {
    let mut out = Vec::new();
    for span in spans {
        if estimate_tokens(&text[span.start..span.end]) <= max_chunk_size {
            out.extend(spans_to_drafts(text, offset, vec![span]));
            continue;
        }
        for (s, e) in hard_split(text, span.start, span.end, max_chunk_size) {
            let mut metadata = span.metadata.clone();
            if let Some(obj) = metadata.as_object_mut() {
                obj.insert("forced_split".to_string(), serde_json::json!(true));
            }
            out.push(ChunkDraft {
                text: text[s..e].to_string(),
                start: offset + s,
                end: offset + e,
                metadata,
            });
        }
    }
    out
}

#[async_trait]
impl Chunker for AssistedChunker {
    fn name(&self) -> &str {
        "assisted"
    }

    async fn chunk(
        &self,
        text: &str,
        max_chunk_size: usize,
        overlap: usize,
        cancel: &CancelToken,
    ) -> Result<Vec<ChunkDraft>> {
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

        let mut drafts = self
            .chunk_range(text, 0, max_chunk_size, overlap, 0, cancel)
            .await?;
        number_chunks(&mut drafts);
        Ok(drafts)
    }
}
