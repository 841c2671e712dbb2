//! Exponential backoff around API calls.

use crate::llm::LlmError;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub retry_if: fn(&LlmError) -> bool,
}

impl RetryPolicy {
    /// Embedding the document set: rate-limit, API and connection errors retry.
    pub fn index_build() -> Self {
        Self {
            max_attempts: 5,
            multiplier: Duration::from_secs(1),
            min_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(60),
            retry_if: |err| !matches!(err, LlmError::InvalidResponse(_)),
        }
    }

    /// Chat completions and query embeddings: only rate-limit and API errors retry.
    pub fn llm_call() -> Self {
        Self {
            max_attempts: 3,
            multiplier: Duration::from_secs(1),
            min_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(30),
            retry_if: |err| matches!(err, LlmError::RateLimited(_) | LlmError::Api { .. }),
        }
    }

    /// Same attempts and predicate, no waiting.
    pub fn immediate(self) -> Self {
        Self {
            multiplier: Duration::ZERO,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..self
        }
    }

    /// Wait before retry number `attempt` (1-based): `multiplier * 2^(attempt-1)`
    /// clamped to `[min_delay, max_delay]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.multiplier
            .saturating_mul(factor)
            .clamp(self.min_delay, self.max_delay.max(self.min_delay))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out. The last error is returned.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_attempts && (policy.retry_if)(&err) => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
