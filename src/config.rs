//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to the defaults
//! below. [`load_config`] parses and validates in one step.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::OversizePolicy;
use crate::models::UpdateMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl Config {
    /// A config with every section at its default, storing to `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            reasoning: ReasoningConfig::default(),
            retrieval: RetrievalConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.max_chunk_size == 0 {
            bail!("chunking.max_chunk_size must be > 0");
        }
        if chunking.overlap >= chunking.max_chunk_size {
            bail!(
                "chunking.overlap ({}) must be smaller than chunking.max_chunk_size ({})",
                chunking.overlap,
                chunking.max_chunk_size
            );
        }
        if chunking.min_chunk_size > chunking.max_chunk_size {
            bail!("chunking.min_chunk_size must not exceed chunking.max_chunk_size");
        }
        match chunking.strategy.as_str() {
            "simple" => {}
            "assisted" => {
                if !self.reasoning.is_enabled() {
                    bail!("chunking.strategy = 'assisted' requires a [reasoning] provider");
                }
            }
            other => bail!(
                "Unknown chunking strategy: '{}'. Must be simple or assisted.",
                other
            ),
        }

        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        match self.retrieval.metric.as_str() {
            "cosine" | "euclidean" | "dot" => {}
            other => bail!(
                "Unknown similarity metric: '{}'. Must be cosine, euclidean, or dot.",
                other
            ),
        }

        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" | "mock" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, mock, or local.",
                other
            ),
        }
        // Local models can infer their own name and dimension.
        if self.embedding.is_enabled() && self.embedding.provider != "local" {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }

        match self.reasoning.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown reasoning provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }
        if self.reasoning.is_enabled() && self.reasoning.model.is_none() {
            bail!(
                "reasoning.model must be specified when provider is '{}'",
                self.reasoning.provider
            );
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Upper bound on chunk size, in estimated tokens.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default)]
    pub overlap: usize,
    /// Above this many tokens the assisted chunker splits recursively.
    #[serde(default = "default_max_direct_tokens")]
    pub max_direct_tokens: usize,
    #[serde(default)]
    pub min_chunk_size: usize,
    #[serde(default = "default_chunk_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_true")]
    pub fallback: bool,
    #[serde(default)]
    pub oversize_policy: OversizePolicy,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            max_chunk_size: default_max_chunk_size(),
            overlap: 0,
            max_direct_tokens: default_max_direct_tokens(),
            min_chunk_size: 0,
            max_retries: default_chunk_retries(),
            max_depth: default_max_depth(),
            fallback: true,
            oversize_policy: OversizePolicy::default(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_strategy() -> String {
    "simple".to_string()
}
fn default_max_chunk_size() -> usize {
    500
}
fn default_max_direct_tokens() -> usize {
    2000
}
fn default_chunk_retries() -> u32 {
    2
}
fn default_max_depth() -> u32 {
    12
}
fn default_true() -> bool {
    true
}
fn default_call_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per HTTP request.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on one batch, retries and backoff included.
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            batch_timeout_secs: default_batch_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    8
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_batch_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReasoningConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_reasoning_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_reasoning_timeout_secs(),
        }
    }
}

impl ReasoningConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_reasoning_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            top_k: default_top_k(),
        }
    }
}

fn default_metric() -> String {
    "cosine".to_string()
}
fn default_top_k() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub update_mode: UpdateMode,
    #[serde(default = "default_true")]
    pub prune_missing: bool,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            update_mode: UpdateMode::default(),
            prune_missing: true,
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.markdown".to_string(),
        "**/*.txt".to_string(),
    ]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/docvec.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.strategy, "simple");
        assert_eq!(config.chunking.max_chunk_size, 500);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.embedding.batch_size, 8);
        assert_eq!(config.retrieval.metric, "cosine");
        assert_eq!(config.sync.update_mode, UpdateMode::UpdateIfNewer);
        assert_eq!(config.chunking.oversize_policy, OversizePolicy::ForceSplit);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nmax_chunk_size = 10\noverlap = 10\n")
            .unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_assisted_requires_reasoning() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nstrategy = \"assisted\"\n").unwrap_err();
        assert!(err.to_string().contains("reasoning"));

        let ok = parse(
            "[db]\npath = \"x\"\n[chunking]\nstrategy = \"assisted\"\n\
             [reasoning]\nprovider = \"ollama\"\nmodel = \"llama3\"\n",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn test_enabled_embedding_needs_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"mock\"\n").unwrap_err();
        assert!(err.to_string().contains("dims"));

        let config = parse(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"mock\"\nmodel = \"mock\"\ndims = 16\n",
        )
        .unwrap();
        assert!(config.embedding.is_enabled());
    }

    #[test]
    fn test_unknown_metric_rejected() {
        let err = parse("[db]\npath = \"x\"\n[retrieval]\nmetric = \"manhattan\"\n").unwrap_err();
        assert!(err.to_string().contains("manhattan"));
    }

    #[test]
    fn test_update_mode_and_policy_parse() {
        let config = parse(
            "[db]\npath = \"x\"\n[sync]\nupdate_mode = \"force\"\n\
             [chunking]\noversize_policy = \"fail\"\n",
        )
        .unwrap();
        assert_eq!(config.sync.update_mode, UpdateMode::Force);
        assert_eq!(config.chunking.oversize_policy, OversizePolicy::Fail);
    }
}
