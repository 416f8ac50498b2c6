//! Retry wrapper for chat models
//!
//! Retries transient provider failures (throttling, model not ready,
//! connection drops) with jittered exponential backoff.

use super::{ChatModel, ChatRequest, ChatResponse};
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            exponential_base: 2.0,
        }
    }

    /// Upper bound of the delay before retry `attempt` (1-based)
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let delay = self.base_delay_ms as f64 * self.exponential_base.powi(attempt as i32 - 1);
        let delay = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay)
    }

    /// Backoff with "equal jitter": half fixed, half random
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.delay_for_attempt(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        ceiling.mul_f64(factor)
    }

    /// Backoff, raised to the error's own hint but never past `max_delay_ms`
    fn delay_after(&self, err: &AgentError, attempt: u32) -> Duration {
        let backoff = self.jittered_delay(attempt);
        match err.retry_delay() {
            Some(hint) => hint.min(Duration::from_millis(self.max_delay_ms)).max(backoff),
            None => backoff,
        }
    }
}

/// Chat model wrapper adding retries on retryable errors
pub struct RetryModel {
    inner: Arc<dyn ChatModel>,
    config: RetryConfig,
}

impl RetryModel {
    pub fn new(inner: Arc<dyn ChatModel>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl ChatModel for RetryModel {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn converse(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match self.inner.converse(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if !e.is_retryable() {
                        return Err(e);
                    }

                    if attempt < self.config.max_retries {
                        let delay = self.config.delay_after(&e, attempt + 1);
                        tracing::warn!(
                            model = %self.inner.model_id(),
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "retrying after transient error: {}",
                            e
                        );
                        sleep(delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AgentError::Internal {
            message: "all retries failed".to_string(),
        }))
    }
}
