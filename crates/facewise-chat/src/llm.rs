//! Seams to the hosted embedding and chat-completion APIs.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("connection error: {0}")]
    Connection(String),
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited(_))
    }

    /// Classify a non-success HTTP reply. 429s and bodies mentioning a rate
    /// limit are rate-limit errors.
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 429 || body.to_lowercase().contains("rate limit") {
            LlmError::RateLimited(body)
        } else {
            LlmError::Api { status, message: body }
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LlmError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            LlmError::from_status(status.as_u16(), err.to_string())
        } else {
            LlmError::Connection(err.to_string())
        }
    }
}

/// Text embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}

/// Chat-completion provider.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(LlmError::from_status(429, "slow down".into()).is_rate_limit());
        assert!(LlmError::from_status(400, "Rate limit reached for requests".into()).is_rate_limit());
        assert!(matches!(
            LlmError::from_status(500, "internal".into()),
            LlmError::Api { status: 500, .. }
        ));
    }
}
