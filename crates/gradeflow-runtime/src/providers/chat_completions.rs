//! Adapter for OpenAI-style `/chat/completions` endpoints.
//!
//! Covers any host speaking that protocol (OpenAI, Groq, local gateways).
//!
//! ## Options
//! ```json
//! {
//!   "name": "groq",
//!   "base_url": "https://api.groq.com/openai/v1",
//!   "model": "llama-3.3-70b-versatile",
//!   "api_key_env": "GROQ_API_KEY",
//!   "json_mode": true,
//!   "max_retries": 2
//! }
//! ```

use super::{
    factory::ProviderFactory,
    retry::RetryPolicy,
    secrets::{ApiCredential, CredentialSource},
    Completion, CompletionRequest, LlmProvider, ProviderError,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat-completions provider.
pub struct ChatCompletionsProvider {
    name: String,
    credential: ApiCredential,
    base_url: String,
    model: String,
    json_mode: bool,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl std::fmt::Debug for ChatCompletionsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsProvider")
            .field("name", &self.name)
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl ChatCompletionsProvider {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            credential: ApiCredential::new(api_key, CredentialSource::Programmatic, "API key"),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            json_mode: true,
            retry: RetryPolicy::default(),
            client: build_client()?,
        })
    }

    pub fn from_config(config: &JsonValue) -> Result<Self, ProviderError> {
        let credential =
            ApiCredential::from_options(config, Some(DEFAULT_API_KEY_ENV), "Chat completions API key")?;

        Ok(Self {
            name: config["name"].as_str().unwrap_or("chat-completions").to_string(),
            credential,
            base_url: config["base_url"]
                .as_str()
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: config["model"].as_str().unwrap_or(DEFAULT_MODEL).to_string(),
            json_mode: config["json_mode"].as_bool().unwrap_or(true),
            retry: RetryPolicy::from_options(config)?,
            client: build_client()?,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    async fn send_once(&self, body: &ApiRequest<'_>) -> Result<Completion, ProviderError> {
        // Credential exposed only here
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(REQUEST_TIMEOUT)
                } else {
                    ProviderError::HttpError(e.to_string())
                }
            })?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            let message = serde_json::from_str::<ApiErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ProviderError::EmptyCompletion)?;

        Ok(Completion {
            text,
            model: body.model,
        })
    }
}

fn build_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("failed to build HTTP client: {}", e)))
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: [ApiMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    type_: &'static str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let wants_object = self.json_mode && request.json_object;
        let body = ApiRequest {
            model: &self.model,
            messages: [
                ApiMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ApiMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: wants_object.then_some(ResponseFormat {
                type_: "json_object",
            }),
        };

        self.retry.run(&self.name, || self.send_once(&body)).await
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty() && !self.base_url.is_empty()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Factory for `chat-completions` providers.
pub struct ChatCompletionsProviderFactory;

impl ProviderFactory for ChatCompletionsProviderFactory {
    fn provider_type(&self) -> &'static str {
        "chat-completions"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn LlmProvider>, ProviderError> {
        self.validate_config(config)?;
        Ok(Arc::new(ChatCompletionsProvider::from_config(config)?))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(config, Some(DEFAULT_API_KEY_ENV)) {
            return Err(ProviderError::NotConfigured(
                "API key required: set 'api_key' or 'api_key_env' in provider options".to_string(),
            ));
        }

        if let Some(url) = config["base_url"].as_str() {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ProviderError::NotConfigured(
                    "base_url must start with http:// or https://".to_string(),
                ));
            }
        }

        RetryPolicy::from_options(config).map(|_| ())
    }

    fn description(&self) -> &'static str {
        "OpenAI-compatible chat completions provider"
    }
}
