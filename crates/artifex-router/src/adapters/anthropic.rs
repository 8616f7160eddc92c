//! Anthropic messages API adapter

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::openai::{classify_reqwest_error, classify_status};
use crate::request::{GenerateRequest, GenerateResponse, ProviderCapabilities, Role};
use crate::router::{ProviderAdapter, ProviderCallError};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Adapter for the Anthropic messages API.
pub struct AnthropicAdapter {
    name: String,
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    capabilities: ProviderCapabilities,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: "anthropic".to_string(),
            client: Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            capabilities: ProviderCapabilities {
                max_context_tokens: 200_000,
                languages: vec![],
                cost_per_1k_tokens: 0.015,
                typical_latency: Duration::from_secs(15),
            },
        }
    }

    /// Build from `ANTHROPIC_API_KEY`, honoring `ANTHROPIC_ENDPOINT` and
    /// `ANTHROPIC_MODEL` overrides.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok()?;
        let mut adapter = Self::new(api_key, "claude-sonnet-4-20250514");
        if let Ok(endpoint) = std::env::var("ANTHROPIC_ENDPOINT") {
            adapter.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("ANTHROPIC_MODEL") {
            adapter.model = model;
        }
        Some(adapter)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities.clone()
    }

    async fn generate(
        &self,
        request: &GenerateRequest,
        timeout: Duration,
    ) -> Result<GenerateResponse, ProviderCallError> {
        // System messages ride in the dedicated field; the messages array
        // holds only user/assistant turns.
        let system: String = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages: Vec<_> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }

        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), message));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ProviderCallError::Protocol(e.to_string()))?;

        let content: String = parsed
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        debug!(provider = %self.name, chars = content.len(), "message returned");

        Ok(GenerateResponse {
            content,
            provider: self.name.clone(),
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            prompt_tokens: parsed.usage.as_ref().and_then(|u| u.input_tokens),
            completion_tokens: parsed.usage.as_ref().and_then(|u| u.output_tokens),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_requires_key() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        assert!(AnthropicAdapter::from_env().is_none());
    }

    #[test]
    fn capabilities_default_to_large_context() {
        let adapter = AnthropicAdapter::new("key", "model");
        assert_eq!(adapter.capabilities().max_context_tokens, 200_000);
    }
}
