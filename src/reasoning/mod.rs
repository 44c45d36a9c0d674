//! Text-reasoning service used by the assisted chunker.
//!
//! The service is a plain prompt → completion call. Prompt construction and
//! response parsing live in [`chunk::plan`](crate::chunk::plan); retries and
//! timeouts are owned by the chunker, so providers here make a single
//! attempt per call.
//!
//! | Config value | Provider |
//! |--------------|----------|
//! | `"disabled"` | [`DisabledReasoner`] |
//! | `"openai"` | [`OpenAIReasoner`] (chat completions) |
//! | `"ollama"` | [`OllamaReasoner`] (`/api/generate`) |

pub mod mock;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ReasoningConfig;
use crate::error::{Error, Result};

pub use mock::ScriptedReasoner;

#[async_trait]
pub trait ReasoningService: Send + Sync {
    fn name(&self) -> &str;

    /// Send `prompt` and return the raw completion text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Always fails; used when no reasoning provider is configured.
pub struct DisabledReasoner;

#[async_trait]
impl ReasoningService for DisabledReasoner {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(Error::reasoning("reasoning provider is disabled"))
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::reasoning(format!("failed to build HTTP client: {e}")))
}

async fn post_json(
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
    service: &str,
) -> Result<serde_json::Value> {
    let response = request
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| Error::reasoning(format!("{service} request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(Error::reasoning(format!(
            "{service} API error {status}: {body_text}"
        )));
    }
    response
        .json()
        .await
        .map_err(|e| Error::reasoning(format!("{service} returned invalid JSON: {e}")))
}

/// OpenAI-compatible chat completions endpoint.
///
/// Reads `OPENAI_API_KEY`. `url` overrides the base (default
/// `https://api.openai.com`) for compatible gateways.
pub struct OpenAIReasoner {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIReasoner {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::config("reasoning.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::config("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        Ok(Self {
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ReasoningService for OpenAIReasoner {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let request = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key));
        let json = post_json(request, &body, "OpenAI").await?;
        parse_openai_completion(&json)
    }
}

fn parse_openai_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::reasoning("invalid OpenAI response: missing choices[0].message.content"))
}

/// Local Ollama instance, non-streaming `/api/generate`.
pub struct OllamaReasoner {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaReasoner {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::config("reasoning.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ReasoningService for OllamaReasoner {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });
        let request = self.client.post(format!("{}/api/generate", self.url));
        let json = post_json(request, &body, "Ollama").await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(str::to_string)
            .ok_or_else(|| Error::reasoning("invalid Ollama response: missing 'response'"))
    }
}

/// Build the configured reasoning service.
pub fn create_reasoner(config: &ReasoningConfig) -> Result<Arc<dyn ReasoningService>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledReasoner)),
        "openai" => Ok(Arc::new(OpenAIReasoner::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaReasoner::new(config)?)),
        other => Err(Error::config(format!("Unknown reasoning provider: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_reasoner_fails() {
        let err = DisabledReasoner.complete("hi").await.unwrap_err();
        assert!(matches!(err, Error::Reasoning(_)));
    }

    #[test]
    fn test_parse_openai_completion() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"chunks\": []}" } }]
        });
        assert_eq!(parse_openai_completion(&json).unwrap(), "{\"chunks\": []}");
        assert!(parse_openai_completion(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_create_reasoner_by_name() {
        let mut config = ReasoningConfig::default();
        assert_eq!(create_reasoner(&config).unwrap().name(), "disabled");

        config.provider = "ollama".to_string();
        config.model = Some("llama3".to_string());
        assert_eq!(create_reasoner(&config).unwrap().name(), "llama3");

        config.provider = "telepathy".to_string();
        assert!(create_reasoner(&config).is_err());
    }
}
