//! OpenAI chat-completions protocol adapter
//!
//! Works against api.openai.com and any OpenAI-compatible endpoint; the
//! endpoint, key, and model come from the environment.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::request::{GenerateRequest, GenerateResponse, ProviderCapabilities};
use crate::router::{ProviderAdapter, ProviderCallError};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Adapter for the OpenAI chat-completions protocol.
pub struct OpenAiAdapter {
    name: String,
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    capabilities: ProviderCapabilities,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: "openai".to_string(),
            client: Client::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            capabilities: ProviderCapabilities {
                max_context_tokens: 128_000,
                languages: vec![],
                cost_per_1k_tokens: 0.01,
                typical_latency: Duration::from_secs(12),
            },
        }
    }

    /// Build from `OPENAI_API_KEY`, honoring `OPENAI_ENDPOINT` and
    /// `OPENAI_MODEL` overrides.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok()?;
        let mut adapter = Self::new(api_key, "gpt-4o");
        if let Ok(endpoint) = std::env::var("OPENAI_ENDPOINT") {
            adapter.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
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
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
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
        let messages: Vec<_> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let started = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
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

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderCallError::Protocol(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        debug!(provider = %self.name, chars = content.len(), "chat completion returned");

        Ok(GenerateResponse {
            content,
            provider: self.name.clone(),
            model: parsed.model.unwrap_or_else(|| self.model.clone()),
            prompt_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            completion_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

pub(crate) fn classify_reqwest_error(e: reqwest::Error) -> ProviderCallError {
    if e.is_timeout() {
        ProviderCallError::Timeout
    } else if e.is_connect() {
        ProviderCallError::Connection(e.to_string())
    } else {
        ProviderCallError::Protocol(e.to_string())
    }
}

pub(crate) fn classify_status(status: u16, message: String) -> ProviderCallError {
    match status {
        401 | 403 | 429 => ProviderCallError::AuthOrQuota { status, message },
        400..=499 => ProviderCallError::BadRequest { status, message },
        _ => ProviderCallError::Server { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(401, String::new()),
            ProviderCallError::AuthOrQuota { .. }
        ));
        assert!(matches!(
            classify_status(429, String::new()),
            ProviderCallError::AuthOrQuota { .. }
        ));
        assert!(matches!(
            classify_status(422, String::new()),
            ProviderCallError::BadRequest { .. }
        ));
        assert!(matches!(
            classify_status(503, String::new()),
            ProviderCallError::Server { .. }
        ));
    }

    #[test]
    fn from_env_requires_key() {
        std::env::remove_var("OPENAI_API_KEY");
        assert!(OpenAiAdapter::from_env().is_none());
    }
}
