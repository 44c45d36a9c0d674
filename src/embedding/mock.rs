//! Deterministic embedder for tests and offline runs.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::Embedder;
use crate::error::{Error, Result};

/// Generates unit-length vectors from the text bytes.
///
/// The same text always maps to the same vector, so identical content
/// scores ≈ 1.0 under cosine. Optionally starts failing after a number of
/// successful calls, to exercise failure paths.
#[derive(Clone)]
pub struct MockEmbedder {
    dims: usize,
    model_name: String,
    fail_after: Option<usize>,
    calls: Arc<AtomicUsize>,
}

impl MockEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            model_name: "mock".to_string(),
            fail_after: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    /// Succeed for `calls` batches, then return errors.
    pub fn fail_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    /// Batches requested so far, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The vector produced for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dims];
        let bytes = text.as_bytes();

        for (i, val) in embedding.iter_mut().enumerate() {
            let byte_val = if bytes.is_empty() {
                0u8
            } else {
                bytes[i % bytes.len()]
            };
            *val = ((byte_val as f32 + i as f32) % 256.0) / 256.0;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut embedding {
                *val /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let previous = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after {
            if previous >= limit {
                return Err(Error::embedding("mock embedder configured to fail"));
            }
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_and_normalized() {
        let mock = MockEmbedder::new(32);
        let out = mock
            .embed(&["alpha".to_string(), "alpha".to_string(), "beta".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], out[1]);
        assert_ne!(out[0], out[2]);
        let norm: f32 = out[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_fail_after() {
        let mock = MockEmbedder::new(4).fail_after(1);
        assert!(mock.embed(&["a".to_string()]).await.is_ok());
        let err = mock.embed(&["b".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingService(_)));
        assert_eq!(mock.call_count(), 2);
    }
}
