//! HTTP client for the Artifex API with exit-code-aware errors.

use serde_json::Value;

/// CLI error carrying its process exit code:
/// 2 invalid submission, 3 transient failure, 4 unrecoverable, 5 timeout.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("unrecoverable: {0}")]
    Unrecoverable(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidSubmission(_) => 2,
            Self::Transient(_) => 3,
            Self::Unrecoverable(_) => 4,
            Self::Timeout(_) => 5,
        }
    }
}

pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value, CliError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }

    pub async fn get(&self, path: &str) -> Result<Value, CliError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode(response).await
    }

    async fn decode(response: reqwest::Response) -> Result<Value, CliError> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(body);
        }

        let message = body
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("no detail")
            .to_string();

        Err(match status.as_u16() {
            400 | 404 | 422 => CliError::InvalidSubmission(message),
            409 => CliError::Unrecoverable(message),
            408 | 504 => CliError::Timeout(message),
            500..=599 => CliError::Transient(message),
            _ => CliError::Unrecoverable(message),
        })
    }
}

fn transport_error(error: reqwest::Error) -> CliError {
    if error.is_timeout() {
        CliError::Timeout(error.to_string())
    } else {
        CliError::Transient(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(CliError::InvalidSubmission("x".into()).exit_code(), 2);
        assert_eq!(CliError::Transient("x".into()).exit_code(), 3);
        assert_eq!(CliError::Unrecoverable("x".into()).exit_code(), 4);
        assert_eq!(CliError::Timeout("x".into()).exit_code(), 5);
    }
}
