//! Adapter-level retry with exponential backoff.
//!
//! Only transient errors (timeouts, rate limits, 5xx) are retried. The
//! gateway above never retries a provider.

use backon::{ExponentialBuilder, Retryable};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::time::Duration;

use super::ProviderError;

/// Retry policy for one provider adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Read `max_retries`, `retry_min_delay` and `retry_max_delay` from
    /// provider options, keeping defaults for anything absent.
    pub fn from_options(options: &JsonValue) -> Result<Self, ProviderError> {
        let mut policy = Self::default();

        if let Some(value) = options.get("max_retries") {
            policy.max_retries = value
                .as_u64()
                .ok_or_else(|| ProviderError::NotConfigured("max_retries must be a non-negative integer".into()))?
                as usize;
        }
        if let Some(delay) = duration_option(options, "retry_min_delay")? {
            policy.min_delay = delay;
        }
        if let Some(delay) = duration_option(options, "retry_max_delay")? {
            policy.max_delay = delay;
        }

        Ok(policy)
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }

    /// Run `operation`, retrying transient failures.
    pub async fn run<T, F, Fut>(&self, provider: &str, operation: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        operation
            .retry(self.backoff())
            .when(ProviderError::is_transient)
            .notify(|err: &ProviderError, delay: Duration| {
                tracing::warn!(
                    provider = %provider,
                    error = %err,
                    delay = ?delay,
                    "Transient provider error, retrying"
                );
            })
            .await
    }
}

fn duration_option(options: &JsonValue, key: &str) -> Result<Option<Duration>, ProviderError> {
    match options.get(key) {
        None => Ok(None),
        Some(value) => {
            let raw = value
                .as_str()
                .ok_or_else(|| ProviderError::NotConfigured(format!("{} must be a duration string", key)))?;
            humantime::parse_duration(raw)
                .map(Some)
                .map_err(|e| ProviderError::NotConfigured(format!("{}: {}", key, e)))
        }
    }
}
