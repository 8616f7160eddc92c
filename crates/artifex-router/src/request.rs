//! Normalized request/response types shared by all provider adapters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Message role in a chat-style generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of the prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A normalized generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub messages: Vec<ChatMessage>,

    /// Target language hint; drives capability filtering and response
    /// validation (code requests must not come back as prose).
    pub language: Option<String>,

    pub max_tokens: u32,

    pub temperature: f32,

    /// Promoted to the front of the candidate list when eligible.
    pub preferred_provider: Option<String>,

    /// Total budget for the call including fallbacks.
    #[serde(with = "duration_millis")]
    pub deadline: Duration,
}

impl GenerateRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            language: None,
            max_tokens: 2048,
            temperature: 0.7,
            preferred_provider: None,
            deadline: Duration::from_secs(120),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Rough input size used for capability filtering. Four characters per
    /// token is close enough for a ceiling check.
    pub fn estimated_tokens(&self) -> u32 {
        let chars: usize = self.messages.iter().map(|m| m.content.len()).sum();
        (chars / 4) as u32 + self.max_tokens
    }
}

/// A normalized generation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub content: String,

    /// Provider that produced the response.
    pub provider: String,

    pub model: String,

    pub prompt_tokens: Option<u32>,

    pub completion_tokens: Option<u32>,

    /// Wall-clock latency of the successful provider call.
    pub latency_ms: u64,
}

/// What a provider can do, used for eligibility and scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub max_context_tokens: u32,

    /// Languages the provider is tuned for; empty means no restriction.
    pub languages: Vec<String>,

    pub cost_per_1k_tokens: f64,

    #[serde(with = "duration_millis")]
    pub typical_latency: Duration,
}

impl Default for ProviderCapabilities {
    fn default() -> Self {
        Self {
            max_context_tokens: 128_000,
            languages: vec![],
            cost_per_1k_tokens: 0.01,
            typical_latency: Duration::from_secs(10),
        }
    }
}

impl ProviderCapabilities {
    /// Whether this provider can satisfy the request.
    pub fn satisfies(&self, request: &GenerateRequest) -> bool {
        if request.estimated_tokens() > self.max_context_tokens {
            return false;
        }
        match (&request.language, self.languages.is_empty()) {
            (Some(lang), false) => self
                .languages
                .iter()
                .any(|l| l.eq_ignore_ascii_case(lang)),
            _ => true,
        }
    }
}

/// One entry of the per-provider failure log attached to
/// `AllProvidersFailed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: String,
    pub kind: String,
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_check_respects_context_window() {
        let caps = ProviderCapabilities {
            max_context_tokens: 100,
            ..Default::default()
        };

        let small = GenerateRequest::new(vec![ChatMessage::user("hi")]).with_max_tokens(10);
        assert!(caps.satisfies(&small));

        let big = GenerateRequest::new(vec![ChatMessage::user("hi")]).with_max_tokens(500);
        assert!(!caps.satisfies(&big));
    }

    #[test]
    fn capability_check_respects_language() {
        let caps = ProviderCapabilities {
            languages: vec!["python".into(), "rust".into()],
            ..Default::default()
        };

        let python = GenerateRequest::new(vec![ChatMessage::user("x")]).with_language("Python");
        assert!(caps.satisfies(&python));

        let go = GenerateRequest::new(vec![ChatMessage::user("x")]).with_language("go");
        assert!(!caps.satisfies(&go));

        // No language hint passes any restriction.
        let none = GenerateRequest::new(vec![ChatMessage::user("x")]);
        assert!(caps.satisfies(&none));
    }

    #[test]
    fn request_round_trips_through_serde() {
        let request = GenerateRequest::new(vec![ChatMessage::user("generate a parser")])
            .with_language("rust")
            .with_preferred_provider("anthropic");

        let json = serde_json::to_string(&request).unwrap();
        let parsed: GenerateRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.messages, request.messages);
        assert_eq!(parsed.preferred_provider.as_deref(), Some("anthropic"));
    }
}
