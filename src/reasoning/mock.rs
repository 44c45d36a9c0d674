//! Scripted reasoning service for tests and offline runs.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::ReasoningService;
use crate::error::{Error, Result};

/// Returns canned responses in order, cycling once exhausted, and records
/// every prompt it receives.
#[derive(Clone)]
pub struct ScriptedReasoner {
    state: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

struct Script {
    responses: Vec<String>,
    index: usize,
    prompts: Vec<String>,
}

impl ScriptedReasoner {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(Script {
                responses,
                index: 0,
                prompts: Vec::new(),
            })),
            delay: None,
        }
    }

    pub fn with_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Sleep this long before answering (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prompts received so far, oldest first.
    pub async fn prompts(&self) -> Vec<String> {
        self.state.lock().await.prompts.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.state.lock().await.prompts.len()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = {
            let mut script = self.state.lock().await;
            script.prompts.push(prompt.to_string());
            if script.responses.is_empty() {
                return Err(Error::reasoning("scripted reasoner has no responses"));
            }
            let response = script.responses[script.index].clone();
            script.index = (script.index + 1) % script.responses.len();
            response
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cycles_and_records() {
        let r = ScriptedReasoner::new(vec!["a".into(), "b".into()]);
        assert_eq!(r.complete("p1").await.unwrap(), "a");
        assert_eq!(r.complete("p2").await.unwrap(), "b");
        assert_eq!(r.complete("p3").await.unwrap(), "a");
        assert_eq!(r.prompts().await, vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let r = ScriptedReasoner::with_response("x");
        let r2 = r.clone();
        r.complete("one").await.unwrap();
        r2.complete("two").await.unwrap();
        assert_eq!(r.call_count().await, 2);
    }

    #[tokio::test]
    async fn test_empty_script_errors() {
        let r = ScriptedReasoner::new(Vec::new());
        assert!(r.complete("p").await.is_err());
    }
}
