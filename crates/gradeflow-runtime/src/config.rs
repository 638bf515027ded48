//! Runtime configuration for the grading and generation pipeline.
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration with no providers.
//!
//! ```yaml
//! providers:
//!   - name: groq
//!     kind: chat-completions
//!     timeout: 20s
//!     options:
//!       base_url: https://api.groq.com/openai/v1
//!       model: llama-3.3-70b-versatile
//!       api_key_env: GROQ_API_KEY
//! grading:
//!   max_concurrency: 8
//! context:
//!   cache_ttl: 10m
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or checking configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Provider '{name}': {message}")]
    Provider { name: String, message: String },
}

/// Durations written as human-readable strings ("30s", "10m").
mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Ordered provider fallback chain (primary first)
    pub providers: Vec<ProviderEntry>,

    pub grading: GradingSettings,

    pub context: ContextSettings,

    pub generation: GenerationSettings,

    pub recommendations: RecommendationSettings,
}

/// One entry of the provider fallback chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Name used in logs and on evaluation records
    pub name: String,

    /// Factory type that builds the provider
    pub kind: String,

    /// Per-call timeout applied by the gateway
    #[serde(with = "human_duration", default = "default_provider_timeout")]
    pub timeout: Duration,

    /// Provider-specific options handed to the factory
    #[serde(default = "empty_options")]
    pub options: JsonValue,
}

impl ProviderEntry {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            timeout: default_provider_timeout(),
            options: empty_options(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_options(mut self, options: JsonValue) -> Self {
        self.options = options;
        self
    }

    /// Factory options with the entry name filled in when absent.
    pub fn factory_options(&self) -> JsonValue {
        let mut options = match &self.options {
            JsonValue::Object(map) => JsonValue::Object(map.clone()),
            _ => empty_options(),
        };
        if options.get("name").is_none() {
            options["name"] = JsonValue::String(self.name.clone());
        }
        options
    }
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(30)
}

fn empty_options() -> JsonValue {
    JsonValue::Object(serde_json::Map::new())
}

/// Subjective grading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingSettings {
    /// Subjective items graded at once
    pub max_concurrency: usize,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Passages retrieved per item
    pub context_depth: usize,
    /// Rubric used when a subjective item carries none
    pub default_rubric: String,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            temperature: 0.3,
            max_output_tokens: 2000,
            context_depth: 3,
            default_rubric: "Standard evaluation criteria".to_string(),
        }
    }
}

/// Retrieval context settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    /// Character budget of a built context
    pub max_chars: usize,
    pub cache_capacity: u64,
    #[serde(with = "human_duration")]
    pub cache_ttl: Duration,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_chars: 8000,
            cache_capacity: 256,
            cache_ttl: Duration::from_secs(600),
        }
    }
}

/// Question generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub objective_max_tokens: u32,
    pub subjective_max_tokens: u32,
    pub context_depth: usize,
    /// Marks a subjective question may carry
    pub allowed_marks: Vec<u32>,
    /// Score an objective question is worth
    pub objective_max_score: u32,
    /// Questions drawn into an assembled assessment
    pub assessment_size: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            objective_max_tokens: 4000,
            subjective_max_tokens: 3000,
            context_depth: 5,
            allowed_marks: vec![5, 10, 15],
            objective_max_score: 1,
            assessment_size: 10,
        }
    }
}

/// Recommendation lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendationSettings {
    /// Gaps looked up for reference material
    pub max_gaps: usize,
    /// Passages retrieved per gap
    pub lookup_depth: usize,
    /// Cap on the ranked list
    pub max_items: usize,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            max_gaps: 5,
            lookup_depth: 2,
            max_items: 10,
        }
    }
}

impl RuntimeConfig {
    /// Parse and check a YAML configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for entry in &self.providers {
            if entry.name.trim().is_empty() {
                return Err(ConfigError::Invalid("provider name must not be empty".into()));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::Provider {
                    name: entry.name.clone(),
                    message: "duplicate provider name".into(),
                });
            }
            if entry.timeout.is_zero() {
                return Err(ConfigError::Provider {
                    name: entry.name.clone(),
                    message: "timeout must be greater than zero".into(),
                });
            }
            if !entry.options.is_object() {
                return Err(ConfigError::Provider {
                    name: entry.name.clone(),
                    message: "options must be a mapping".into(),
                });
            }
        }

        if self.grading.max_concurrency == 0 {
            return Err(ConfigError::Invalid("grading.max_concurrency must be at least 1".into()));
        }
        if self.context.max_chars == 0 {
            return Err(ConfigError::Invalid("context.max_chars must be at least 1".into()));
        }
        if self.generation.allowed_marks.iter().any(|m| *m == 0) {
            return Err(ConfigError::Invalid("generation.allowed_marks must be positive".into()));
        }
        if self.generation.objective_max_score == 0 {
            return Err(ConfigError::Invalid(
                "generation.objective_max_score must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// Names of the configured providers in fallback order.
    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name.as_str()).collect()
    }
}
