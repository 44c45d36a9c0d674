//! Chunk plans returned by the reasoning service.
//!
//! The assisted chunker asks for a JSON plan whose chunks are anchored by
//! verbatim `start_text` / `end_text` markers:
//!
//! ```json
//! {"chunks": [
//!   {"id": 1, "metadata": {"topic": "setup", "type": "procedure"},
//!    "start_text": "To install the", "end_text": "and restart."}
//! ]}
//! ```
//!
//! This module builds the prompts, extracts and validates the plan, maps
//! markers back to byte spans, and renders rejected plans into corrective
//! feedback grouped by kind of problem.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::{estimate_tokens, CHARS_PER_TOKEN};

/// One chunk as described by the plan, before its markers are located.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChunk {
    pub id: i64,
    pub metadata: Map<String, Value>,
    pub start_text: String,
    pub end_text: String,
}

/// A located, normalised chunk span inside the planned text.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSpan {
    pub start: usize,
    pub end: usize,
    pub metadata: Value,
}

/// Kinds of plan problems, in the order they are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IssueKind {
    MalformedResponse,
    MissingFields,
    UnlocatableMarkers,
    Oversize,
    Undersize,
    CoverageGaps,
}

impl IssueKind {
    pub fn heading(&self) -> &'static str {
        match self {
            Self::MalformedResponse => "MALFORMED RESPONSE",
            Self::MissingFields => "MISSING FIELDS",
            Self::UnlocatableMarkers => "UNLOCATABLE MARKERS",
            Self::Oversize => "OVERSIZE CHUNKS",
            Self::Undersize => "UNDERSIZE CHUNKS",
            Self::CoverageGaps => "COVERAGE GAPS",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanIssue {
    pub kind: IssueKind,
    pub detail: String,
}

impl PlanIssue {
    pub fn new(kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Why a plan was refused.
///
/// `spans` is present when every marker was located, so a caller can still
/// act on the layout (e.g. force-split the oversize ones).
#[derive(Debug, Clone)]
pub struct PlanRejection {
    pub issues: Vec<PlanIssue>,
    pub spans: Option<Vec<PlannedSpan>>,
}

impl PlanRejection {
    pub fn only_oversize(&self) -> bool {
        self.spans.is_some()
            && !self.issues.is_empty()
            && self.issues.iter().all(|i| i.kind == IssueKind::Oversize)
    }
}

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)```").expect("static regex"))
}

fn fenced_any_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").expect("static regex"))
}

fn split_point_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)BEGIN_SPLIT_POINT\s*(.*?)\s*END_SPLIT_POINT").expect("static regex")
    })
}

/// Pull the JSON payload out of a free-form response.
///
/// Tries a ```` ```json ```` fence, then any fence, then the outermost
/// brace pair.
pub fn extract_json(response: &str) -> Option<&str> {
    if let Some(c) = fenced_json_re().captures(response).and_then(|c| c.get(1)) {
        return Some(c.as_str().trim());
    }
    if let Some(c) = fenced_any_re().captures(response).and_then(|c| c.get(1)) {
        let inner = c.as_str().trim();
        if inner.starts_with('{') {
            return Some(inner);
        }
    }
    let open = response.find('{')?;
    let close = response.rfind('}')?;
    (close > open).then(|| &response[open..=close])
}

/// Parse and schema-check a plan. Collects every problem, not just the first.
pub fn parse_plan(response: &str) -> Result<Vec<PlannedChunk>, Vec<PlanIssue>> {
    use IssueKind::*;

    let Some(raw) = extract_json(response) else {
        return Err(vec![PlanIssue::new(
            MalformedResponse,
            "no JSON object found in the response",
        )]);
    };
    let root: Value = serde_json::from_str(raw)
        .map_err(|e| vec![PlanIssue::new(MalformedResponse, format!("invalid JSON: {e}"))])?;

    let Some(root) = root.as_object() else {
        return Err(vec![PlanIssue::new(
            MalformedResponse,
            "the top level must be a JSON object",
        )]);
    };
    let Some(entries) = root.get("chunks") else {
        return Err(vec![PlanIssue::new(
            MissingFields,
            "top-level 'chunks' array is missing",
        )]);
    };
    let Some(entries) = entries.as_array() else {
        return Err(vec![PlanIssue::new(MissingFields, "'chunks' must be an array")]);
    };
    if entries.is_empty() {
        return Err(vec![PlanIssue::new(
            MalformedResponse,
            "'chunks' must contain at least one chunk",
        )]);
    }

    let mut issues = Vec::new();
    let mut chunks = Vec::with_capacity(entries.len());

    for (i, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            issues.push(PlanIssue::new(MissingFields, format!("chunk {i} is not an object")));
            continue;
        };

        let missing: Vec<&str> = ["id", "metadata", "start_text", "end_text"]
            .into_iter()
            .filter(|f| !obj.contains_key(*f))
            .collect();
        if !missing.is_empty() {
            issues.push(PlanIssue::new(
                MissingFields,
                format!("chunk {i} is missing required fields: {}", missing.join(", ")),
            ));
            continue;
        }

        let before = issues.len();
        let id = obj["id"].as_i64();
        if id.is_none() {
            issues.push(PlanIssue::new(
                MissingFields,
                format!("chunk {i}: 'id' must be an integer"),
            ));
        }
        let metadata = obj["metadata"].as_object();
        match metadata {
            None => issues.push(PlanIssue::new(
                MissingFields,
                format!("chunk {i}: 'metadata' must be an object"),
            )),
            Some(m) => {
                for key in ["topic", "type"] {
                    if !m.contains_key(key) {
                        issues.push(PlanIssue::new(
                            MissingFields,
                            format!("chunk {i}: metadata is missing '{key}'"),
                        ));
                    }
                }
            }
        }
        let start_text = obj["start_text"].as_str().filter(|s| !s.trim().is_empty());
        let end_text = obj["end_text"].as_str().filter(|s| !s.trim().is_empty());
        if start_text.is_none() {
            issues.push(PlanIssue::new(
                MissingFields,
                format!("chunk {i}: 'start_text' must be a non-empty string"),
            ));
        }
        if end_text.is_none() {
            issues.push(PlanIssue::new(
                MissingFields,
                format!("chunk {i}: 'end_text' must be a non-empty string"),
            ));
        }

        if issues.len() == before {
            if let (Some(id), Some(m), Some(s), Some(e)) = (id, metadata, start_text, end_text) {
                chunks.push(PlannedChunk {
                    id,
                    metadata: m.clone(),
                    start_text: s.to_string(),
                    end_text: e.to_string(),
                });
            }
        }
    }

    if issues.is_empty() {
        Ok(chunks)
    } else {
        Err(issues)
    }
}

/// Find `marker` in `haystack` at or after byte `from`.
///
/// Exact match first; failing that, a match that tolerates any run of
/// whitespace wherever the marker has whitespace.
pub fn locate_marker(haystack: &str, marker: &str, from: usize) -> Option<(usize, usize)> {
    let from = super::floor_char_boundary(haystack, from);
    let marker = marker.trim();
    if marker.is_empty() {
        return None;
    }
    if let Some(pos) = haystack[from..].find(marker) {
        return Some((from + pos, from + pos + marker.len()));
    }
    let re = fuzzy_pattern(marker)?;
    re.find_at(haystack, from).map(|m| (m.start(), m.end()))
}

fn fuzzy_pattern(marker: &str) -> Option<Regex> {
    let tokens: Vec<String> = marker.split_whitespace().map(regex::escape).collect();
    if tokens.is_empty() {
        return None;
    }
    Regex::new(&tokens.join(r"\s+")).ok()
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    let mut out: String = trimmed.chars().take(60).collect();
    if trimmed.chars().count() > 60 {
        out.push_str("...");
    }
    out.replace('\n', " ")
}

/// Parse `response`, locate every chunk in `text`, normalise, and check
/// coverage and size bounds.
///
/// Normalisation absorbs whitespace-only gaps into the preceding chunk (or
/// the first chunk, for leading whitespace) and clamps overlapping spans so
/// each byte belongs to exactly one chunk.
pub fn evaluate_plan(
    text: &str,
    response: &str,
    max_tokens: usize,
    min_tokens: usize,
) -> Result<Vec<PlannedSpan>, PlanRejection> {
    use IssueKind::*;

    let planned = parse_plan(response).map_err(|issues| PlanRejection {
        issues,
        spans: None,
    })?;

    let mut issues = Vec::new();
    let mut located = Vec::with_capacity(planned.len());
    let mut search_from = 0;

    for chunk in &planned {
        let Some((start, start_marker_end)) = locate_marker(text, &chunk.start_text, search_from)
        else {
            issues.push(PlanIssue::new(
                UnlocatableMarkers,
                format!(
                    "chunk {}: start_text \"{}\" does not appear in the text",
                    chunk.id, chunk.start_text
                ),
            ));
            continue;
        };
        let end = match locate_marker(text, &chunk.end_text, start) {
            Some((_, end)) => end.max(start_marker_end),
            None => {
                issues.push(PlanIssue::new(
                    UnlocatableMarkers,
                    format!(
                        "chunk {}: end_text \"{}\" does not appear after its start_text",
                        chunk.id, chunk.end_text
                    ),
                ));
                continue;
            }
        };

        let mut metadata = chunk.metadata.clone();
        metadata.insert("plan_id".to_string(), Value::from(chunk.id));
        metadata.insert("strategy".to_string(), Value::from("assisted"));
        located.push(PlannedSpan {
            start,
            end,
            metadata: Value::Object(metadata),
        });
        search_from = start;
    }

    if !issues.is_empty() {
        return Err(PlanRejection {
            issues,
            spans: None,
        });
    }

    located.sort_by_key(|s| s.start);
    let mut spans: Vec<PlannedSpan> = Vec::with_capacity(located.len());
    for mut span in located {
        if let Some(prev) = spans.last_mut() {
            if span.start < prev.end {
                span.start = prev.end;
            }
            if span.start >= span.end {
                continue;
            }
            let gap = &text[prev.end..span.start];
            if gap.trim().is_empty() {
                prev.end = span.start;
            } else {
                issues.push(PlanIssue::new(
                    CoverageGaps,
                    format!(
                        "text between chunk {} and chunk {} is not covered: \"{}\"",
                        prev.metadata["plan_id"],
                        span.metadata["plan_id"],
                        excerpt(gap)
                    ),
                ));
            }
        }
        spans.push(span);
    }

    if let Some(first) = spans.first_mut() {
        let lead = &text[..first.start];
        if lead.trim().is_empty() {
            first.start = 0;
        } else {
            issues.push(PlanIssue::new(
                CoverageGaps,
                format!("text before the first chunk is not covered: \"{}\"", excerpt(lead)),
            ));
        }
    }
    if let Some(last) = spans.last_mut() {
        let tail = &text[last.end..];
        if tail.trim().is_empty() {
            last.end = text.len();
        } else {
            issues.push(PlanIssue::new(
                CoverageGaps,
                format!("text after the last chunk is not covered: \"{}\"", excerpt(tail)),
            ));
        }
    }

    let several = spans.len() > 1;
    for span in &spans {
        let tokens = estimate_tokens(&text[span.start..span.end]);
        if tokens > max_tokens {
            issues.push(PlanIssue::new(
                Oversize,
                format!(
                    "chunk {} is about {} tokens; the limit is {}",
                    span.metadata["plan_id"], tokens, max_tokens
                ),
            ));
        } else if several && min_tokens > 0 && tokens < min_tokens {
            issues.push(PlanIssue::new(
                Undersize,
                format!(
                    "chunk {} is about {} tokens; merge it with a neighbour (minimum {})",
                    span.metadata["plan_id"], tokens, min_tokens
                ),
            ));
        }
    }

    if issues.is_empty() {
        Ok(spans)
    } else {
        Err(PlanRejection {
            issues,
            spans: Some(spans),
        })
    }
}

/// Render issues as a report grouped by kind.
pub fn feedback_report(issues: &[PlanIssue]) -> String {
    let mut grouped: BTreeMap<IssueKind, Vec<&str>> = BTreeMap::new();
    for issue in issues {
        grouped.entry(issue.kind).or_default().push(&issue.detail);
    }
    let mut out = String::new();
    for (kind, details) in grouped {
        out.push_str(kind.heading());
        out.push_str(":\n");
        for d in details {
            out.push_str("  - ");
            out.push_str(d);
            out.push('\n');
        }
    }
    out
}

fn feedback_section(feedback: Option<&str>) -> String {
    match feedback {
        Some(f) => format!(
            "\nYour previous answer was rejected for these reasons:\n\n{}\nFix every problem listed above and answer again.\n",
            f
        ),
        None => String::new(),
    }
}

/// Prompt asking for a full chunk plan of `text`.
pub fn direct_prompt(text: &str, max_tokens: usize, feedback: Option<&str>) -> String {
    format!(
        r#"Split the document below into coherent chunks for semantic search.

Rules:
- Each chunk must be at most {max_tokens} tokens (about {max_chars} characters).
- Chunks follow document order and together cover the whole text, with nothing left out.
- Anchor each chunk with start_text and end_text: 5 to 10 words copied verbatim from the text where the chunk begins and where it ends.

Respond with JSON only, in exactly this shape:
{{"chunks": [{{"id": 1, "metadata": {{"topic": "...", "type": "..."}}, "start_text": "...", "end_text": "..."}}]}}
{feedback}
DOCUMENT:
<<<
{text}
>>>
"#,
        max_tokens = max_tokens,
        max_chars = max_tokens * CHARS_PER_TOKEN,
        feedback = feedback_section(feedback),
        text = text,
    )
}

/// Prompt asking for one split point near the middle of `text`.
pub fn split_prompt(text: &str, feedback: Option<&str>) -> String {
    format!(
        r#"The document below is too long to chunk in one pass and must be cut in two.
Pick one place near the middle where a new section, topic, or paragraph begins.

Copy 5 to 10 words verbatim from the text, starting exactly where the second half
should begin, and wrap them like this:

BEGIN_SPLIT_POINT
<the copied words>
END_SPLIT_POINT
{feedback}
DOCUMENT:
<<<
{text}
>>>
"#,
        feedback = feedback_section(feedback),
        text = text,
    )
}

/// The snippet between `BEGIN_SPLIT_POINT` and `END_SPLIT_POINT`, if any.
pub fn parse_split_point(response: &str) -> Option<String> {
    split_point_re()
        .captures(response)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Byte offset where `snippet` occurs closest to the middle of `text`.
///
/// Only offsets that leave non-blank text on both sides qualify.
pub fn locate_split(text: &str, snippet: &str) -> Option<usize> {
    let snippet = snippet.trim();
    if snippet.is_empty() {
        return None;
    }
    let mut candidates: Vec<usize> = text.match_indices(snippet).map(|(i, _)| i).collect();
    if candidates.is_empty() {
        if let Some(re) = fuzzy_pattern(snippet) {
            candidates = re.find_iter(text).map(|m| m.start()).collect();
        }
    }

    let mid = text.len() / 2;
    candidates
        .into_iter()
        .filter(|&pos| !text[..pos].trim().is_empty() && !text[pos..].trim().is_empty())
        .min_by_key(|&pos| pos.abs_diff(mid))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "Intro line here.\n\nSecond part starts here and goes on.\n\nThird part wraps up.";

    fn plan(chunks: &[(i64, &str, &str)]) -> String {
        let arr: Vec<Value> = chunks
            .iter()
            .map(|(id, s, e)| {
                serde_json::json!({
                    "id": id,
                    "metadata": {"topic": "t", "type": "paragraph"},
                    "start_text": s,
                    "end_text": e,
                })
            })
            .collect();
        serde_json::json!({ "chunks": arr }).to_string()
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_json("here:\n```\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_json("sure! {\"a\":1} done"), Some("{\"a\":1}"));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_plan_reports_missing_fields() {
        let issues = parse_plan(r#"{"chunks": [{"id": 1, "metadata": {"topic": "a"}}]}"#)
            .unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::MissingFields);
        assert!(issues[0].detail.contains("start_text"));
        assert!(issues[0].detail.contains("end_text"));
    }

    #[test]
    fn test_parse_plan_reports_wrong_types() {
        let issues = parse_plan(
            r#"{"chunks": [{"id": "one", "metadata": {"topic": "a"}, "start_text": "x", "end_text": 3}]}"#,
        )
        .unwrap_err();
        let details: Vec<&str> = issues.iter().map(|i| i.detail.as_str()).collect();
        assert!(details.iter().any(|d| d.contains("'id' must be an integer")));
        assert!(details.iter().any(|d| d.contains("missing 'type'")));
        assert!(details.iter().any(|d| d.contains("'end_text'")));
    }

    #[test]
    fn test_parse_plan_malformed() {
        let issues = parse_plan("{not json").unwrap_err();
        assert_eq!(issues[0].kind, IssueKind::MalformedResponse);
        let issues = parse_plan(r#"{"chunks": []}"#).unwrap_err();
        assert_eq!(issues[0].kind, IssueKind::MalformedResponse);
    }

    #[test]
    fn test_locate_marker_exact_and_fuzzy() {
        let hay = "alpha beta\n   gamma delta";
        assert_eq!(locate_marker(hay, "beta", 0), Some((6, 10)));
        assert_eq!(locate_marker(hay, "beta gamma", 0), Some((6, 19)));
        assert_eq!(locate_marker(hay, "alpha", 1), None);
        assert_eq!(locate_marker(hay, "   ", 0), None);
    }

    #[test]
    fn test_evaluate_plan_accepts_and_absorbs_whitespace() {
        let response = plan(&[
            (1, "Intro line", "line here."),
            (2, "Second part", "goes on."),
            (3, "Third part", "wraps up."),
        ]);
        let spans = evaluate_plan(TEXT, &response, 100, 0).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].end, spans[1].start);
        assert_eq!(spans[1].end, spans[2].start);
        assert_eq!(spans[2].end, TEXT.len());
        assert_eq!(spans[1].metadata["topic"], "t");
        assert_eq!(spans[1].metadata["strategy"], "assisted");
    }

    #[test]
    fn test_evaluate_plan_clamps_overlap() {
        let response = plan(&[
            (1, "Intro line", "Second part starts"),
            (2, "Second part", "wraps up."),
        ]);
        let spans = evaluate_plan(TEXT, &response, 100, 0).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].end, spans[1].start);
    }

    #[test]
    fn test_evaluate_plan_detects_gap() {
        let response = plan(&[(1, "Intro line", "line here."), (3, "Third part", "wraps up.")]);
        let rejection = evaluate_plan(TEXT, &response, 100, 0).unwrap_err();
        assert!(rejection
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::CoverageGaps && i.detail.contains("Second part")));
        assert!(!rejection.only_oversize());
    }

    #[test]
    fn test_evaluate_plan_unlocatable() {
        let response = plan(&[(1, "Nowhere to be found", "wraps up.")]);
        let rejection = evaluate_plan(TEXT, &response, 100, 0).unwrap_err();
        assert_eq!(rejection.issues[0].kind, IssueKind::UnlocatableMarkers);
        assert!(rejection.spans.is_none());
    }

    #[test]
    fn test_evaluate_plan_oversize_only() {
        let response = plan(&[(1, "Intro line", "wraps up.")]);
        let rejection = evaluate_plan(TEXT, &response, 5, 0).unwrap_err();
        assert!(rejection.only_oversize());
        let spans = rejection.spans.unwrap();
        assert_eq!((spans[0].start, spans[0].end), (0, TEXT.len()));
    }

    #[test]
    fn test_evaluate_plan_undersize() {
        let response = plan(&[
            (1, "Intro line", "line here."),
            (2, "Second part", "wraps up."),
        ]);
        let rejection = evaluate_plan(TEXT, &response, 100, 6).unwrap_err();
        assert!(rejection.issues.iter().any(|i| i.kind == IssueKind::Undersize));
    }

    #[test]
    fn test_feedback_groups_by_kind() {
        let issues = vec![
            PlanIssue::new(IssueKind::Oversize, "chunk 2 too big"),
            PlanIssue::new(IssueKind::MissingFields, "chunk 0 missing id"),
            PlanIssue::new(IssueKind::Oversize, "chunk 3 too big"),
        ];
        let report = feedback_report(&issues);
        let missing_at = report.find("MISSING FIELDS:").unwrap();
        let oversize_at = report.find("OVERSIZE CHUNKS:").unwrap();
        assert!(missing_at < oversize_at);
        assert_eq!(report.matches("OVERSIZE CHUNKS:").count(), 1);
        assert!(report.contains("  - chunk 3 too big"));
    }

    #[test]
    fn test_prompts_carry_feedback() {
        let p = direct_prompt("body", 50, Some("MISSING FIELDS:\n  - x\n"));
        assert!(p.contains("rejected"));
        assert!(p.contains("MISSING FIELDS"));
        assert!(p.contains("200 characters"));
        assert!(!direct_prompt("body", 50, None).contains("rejected"));
        assert!(split_prompt("body", None).contains("BEGIN_SPLIT_POINT"));
    }

    #[test]
    fn test_split_point_parse_and_locate() {
        let resp = "Sure.\nBEGIN_SPLIT_POINT\nSecond part starts here\nEND_SPLIT_POINT";
        let snippet = parse_split_point(resp).unwrap();
        assert_eq!(snippet, "Second part starts here");
        let pos = locate_split(TEXT, &snippet).unwrap();
        assert!(TEXT[pos..].starts_with("Second part"));
        assert_eq!(parse_split_point("no markers"), None);
        // Splitting at offset 0 would leave an empty left half.
        assert_eq!(locate_split(TEXT, "Intro line"), None);
    }
}
