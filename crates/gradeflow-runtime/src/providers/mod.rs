//! Generation provider abstractions.
//!
//! A provider turns a system prompt plus a user prompt into raw text. The
//! gateway treats every provider error the same way; only adapters care
//! which errors are transient.
//!
//! ## Security
//!
//! Adapters hold credentials as [`ApiCredential`], which never prints its
//! value.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

mod factory;
mod retry;
pub mod secrets;

#[cfg(feature = "http")]
mod chat_completions;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use retry::RetryPolicy;
pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "http")]
pub use chat_completions::{ChatCompletionsProvider, ChatCompletionsProviderFactory};

/// Errors from generation providers.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Response parse error: {0}")]
    ParseError(String),

    #[error("Empty completion")]
    EmptyCompletion,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Whether an adapter may retry the call.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            ProviderError::ParseError(_)
            | ProviderError::EmptyCompletion
            | ProviderError::NotConfigured(_) => false,
        }
    }
}

/// One completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the backend to constrain output to a single JSON object
    pub json_object: bool,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: 0.3,
            max_tokens: 2000,
            json_object: false,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn json_object(mut self) -> Self {
        self.json_object = true;
        self
    }
}

/// Raw provider output.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Generated text, untrusted
    pub text: String,

    /// Model that produced it, when the provider reports one
    pub model: Option<String>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
        }
    }
}

/// A text-generation backend.
///
/// Implementations own any retry policy; callers above the adapter only
/// see the final outcome.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    /// Cheap readiness check (credentials present, endpoint configured).
    async fn health_check(&self) -> bool;

    /// Provider name for logs and evaluation records.
    fn name(&self) -> &str;
}
