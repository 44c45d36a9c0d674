//! Error taxonomy for the document store.
//!
//! Library code returns [`Result<T>`]; the CLI layer wraps these in
//! `anyhow` for context chains. Component-level retries (embedding HTTP
//! calls, assisted chunking) are exhausted before an error surfaces here.

use thiserror::Error;

/// Errors surfaced by store, chunking, embedding, and search operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying I/O, SQL, or on-disk corruption failure. Never retried.
    #[error("storage error: {0}")]
    Storage(String),

    /// A document with this path already exists (update mode `error`).
    #[error("document already exists: {0}")]
    DocumentExists(String),

    /// The addressed document or chunk is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Chunking failed and no fallback produced a valid result.
    #[error("chunking failed: {0}")]
    Chunking(String),

    /// The embedding service failed or returned an unusable response.
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// The reasoning service failed or timed out.
    #[error("reasoning service error: {0}")]
    Reasoning(String),

    /// A caller-supplied argument violates a precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The job was cancelled before it committed.
    #[error("operation cancelled")]
    Cancelled,

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn chunking(msg: impl Into<String>) -> Self {
        Self::Chunking(msg.into())
    }

    pub fn embedding(msg: impl Into<String>) -> Self {
        Self::EmbeddingService(msg.into())
    }

    pub fn reasoning(msg: impl Into<String>) -> Self {
        Self::Reasoning(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether a failed external call may succeed on another attempt.
    ///
    /// Only service-side failures qualify. Storage and argument errors
    /// are deterministic and retrying them would only repeat the failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingService(_) | Self::Reasoning(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(format!("I/O: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("metadata encoding: {e}"))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
