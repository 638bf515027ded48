//! Generation gateway: one call contract over an ordered provider chain.
//!
//! Providers are tried strictly in configured order and the first success
//! wins. Each call gets its own timeout; a timeout counts as an ordinary
//! failure. The gateway never retries a provider and never calls two
//! providers at once.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, ProviderEntry};
use crate::providers::{CompletionRequest, LlmProvider, ProviderError, ProviderRegistry};

/// Errors from the gateway.
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Every provider failed; carries the last one tried.
    #[error("all providers failed (last: '{provider}'): {cause}")]
    Exhausted { provider: String, cause: ProviderError },

    #[error("generation cancelled")]
    Cancelled,

    #[error("no providers configured")]
    NoProviders,
}

/// Successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    /// Raw provider output, untrusted
    pub text: String,
    /// Name of the provider that answered
    pub provider: String,
    pub latency: Duration,
}

/// Counters for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderStats {
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
}

/// Snapshot of gateway activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub providers: BTreeMap<String, ProviderStats>,
    pub last_provider: Option<String>,
}

struct ProviderSlot {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
}

enum Attempt {
    Success,
    Failure,
    Timeout,
}

/// Ordered fallback over generation providers.
pub struct GenerationGateway {
    slots: Vec<ProviderSlot>,
    stats: RwLock<GatewayStats>,
}

impl Default for GenerationGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationGateway {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            stats: RwLock::new(GatewayStats::default()),
        }
    }

    /// Append a provider to the end of the chain.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        self.push(provider, timeout);
        self
    }

    pub fn push(&mut self, provider: Arc<dyn LlmProvider>, timeout: Duration) {
        self.slots.push(ProviderSlot { provider, timeout });
    }

    /// Build the chain from configured entries, in order.
    pub fn from_config(
        entries: &[ProviderEntry],
        registry: &ProviderRegistry,
    ) -> Result<Self, ConfigError> {
        let mut gateway = Self::new();
        for entry in entries {
            let provider = registry
                .create(&entry.kind, &entry.factory_options())
                .map_err(|e| ConfigError::Provider {
                    name: entry.name.clone(),
                    message: e.to_string(),
                })?;
            gateway.push(provider, entry.timeout);
        }
        Ok(gateway)
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.provider.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Run one request through the chain.
    ///
    /// Fails only after every provider has failed, or when `cancel` fires.
    /// An in-flight provider call is dropped on cancellation.
    pub async fn generate(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Generation, GatewayError> {
        let mut last_failure: Option<(String, ProviderError)> = None;

        for slot in &self.slots {
            if cancel.is_cancelled() {
                return Err(GatewayError::Cancelled);
            }

            let name = slot.provider.name().to_string();
            let started = Instant::now();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                outcome = tokio::time::timeout(slot.timeout, slot.provider.complete(request)) => outcome,
            };

            let cause = match outcome {
                Ok(Ok(completion)) if !completion.text.trim().is_empty() => {
                    self.record(&name, Attempt::Success);
                    let latency = started.elapsed();
                    tracing::debug!(provider = %name, latency = ?latency, "Generation succeeded");
                    return Ok(Generation {
                        text: completion.text,
                        provider: name,
                        latency,
                    });
                }
                Ok(Ok(_)) => {
                    self.record(&name, Attempt::Failure);
                    ProviderError::EmptyCompletion
                }
                Ok(Err(e)) => {
                    self.record(&name, Attempt::Failure);
                    e
                }
                Err(_) => {
                    self.record(&name, Attempt::Timeout);
                    ProviderError::Timeout(slot.timeout)
                }
            };

            tracing::warn!(
                provider = %name,
                error = %cause,
                "Provider failed, trying next in chain"
            );
            last_failure = Some((name, cause));
        }

        match last_failure {
            Some((provider, cause)) => {
                tracing::error!(
                    provider = %provider,
                    error = %cause,
                    providers = self.slots.len(),
                    "All generation providers failed"
                );
                Err(GatewayError::Exhausted { provider, cause })
            }
            None => Err(GatewayError::NoProviders),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> GatewayStats {
        self.stats.read().clone()
    }

    fn record(&self, provider: &str, attempt: Attempt) {
        let mut stats = self.stats.write();
        let entry = stats.providers.entry(provider.to_string()).or_default();
        match attempt {
            Attempt::Success => entry.successes += 1,
            Attempt::Failure => entry.failures += 1,
            Attempt::Timeout => {
                entry.failures += 1;
                entry.timeouts += 1;
            }
        }
        if matches!(attempt, Attempt::Success) {
            stats.last_provider = Some(provider.to_string());
        }
    }
}

impl std::fmt::Debug for GenerationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationGateway")
            .field("providers", &self.provider_names())
            .finish()
    }
}
