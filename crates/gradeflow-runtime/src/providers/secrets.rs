//! Credential handling for provider adapters.
//!
//! Credentials never appear in Debug or Display output and are only
//! exposed at the point where a request header is built.
//!
//! ```ignore
//! // options: { "api_key_env": "GROQ_API_KEY" }
//! let cred = ApiCredential::from_options(&options, None, "Groq API key")?;
//! request.bearer_auth(cred.expose());
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Option key holding an inline key.
pub const API_KEY_OPTION: &str = "api_key";

/// Option key naming the environment variable that holds the key.
pub const API_KEY_ENV_OPTION: &str = "api_key_env";

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Inline in provider options
    Config,
    /// Environment variable
    Environment,
    /// Passed in code
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// An API key that redacts itself.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, ProviderError> {
        std::env::var(env_var)
            .map(|v| Self::new(v, CredentialSource::Environment, name))
            .map_err(|_| {
                ProviderError::NotConfigured(format!(
                    "{} not set: configure '{}' environment variable",
                    name, env_var
                ))
            })
    }

    /// Load from provider options.
    ///
    /// Lookup order: inline `api_key`, then the variable named by
    /// `api_key_env`, then `default_env` if given.
    pub fn from_options(
        options: &JsonValue,
        default_env: Option<&str>,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = options[API_KEY_OPTION].as_str() {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        let env_var = options[API_KEY_ENV_OPTION].as_str().or(default_env);
        match env_var {
            Some(var) => Self::from_env(var, name),
            None => Err(ProviderError::NotConfigured(format!(
                "{} required: set '{}' or '{}' in provider options",
                name, API_KEY_OPTION, API_KEY_ENV_OPTION
            ))),
        }
    }

    /// Whether options resolve to a credential, without loading it.
    pub fn is_available(options: &JsonValue, default_env: Option<&str>) -> bool {
        if options[API_KEY_OPTION].as_str().is_some() {
            return true;
        }
        options[API_KEY_ENV_OPTION]
            .as_str()
            .or(default_env)
            .is_some_and(|var| std::env::var(var).is_ok())
    }

    /// Expose the value. Call only where a request is built.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}
