//! Agent configuration with range validation.
//!
//! Configuration can be built directly, deserialized from JSON, or loaded
//! from `PARLEY_*` environment variables. All numeric knobs are validated
//! against fixed ranges; violations surface as [`Error::Validation`] with
//! the offending field and constraint.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

const TEMPERATURE_RANGE: (f64, f64) = (0.0, 2.0);
const MAX_TOKENS_RANGE: (u32, u32) = (1, 32_000);
const MAX_MESSAGE_LENGTH_RANGE: (usize, usize) = (1, 10_000);
const MAX_CONTEXT_MESSAGES_RANGE: (usize, usize) = (1, 100);
const MAX_RETRIES_RANGE: (u32, u32) = (1, 10);
const TIMEOUT_SECS_RANGE: (u64, u64) = (1, 300);

/// Runtime configuration for a conversational agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Human-friendly agent identifier.
    #[serde(default = "default_agent_name")]
    pub agent_name: String,
    /// Model identifier sent to the completion provider.
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum tokens per completion, also the context retrieval budget.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Maximum length of input messages in characters.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Maximum non-system messages kept in the context window.
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,
    /// Retry attempts for provider calls.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Provider endpoint URL.
    pub endpoint: String,
    /// Provider API key.
    pub api_key: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Optional system prompt.
    #[serde(default)]
    pub system_message: Option<String>,
}

fn default_agent_name() -> String {
    "parley".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

const fn default_temperature() -> f64 {
    0.7
}

const fn default_max_tokens() -> u32 {
    2_000
}

const fn default_max_message_length() -> usize {
    4_000
}

const fn default_max_context_messages() -> usize {
    20
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_timeout_secs() -> u64 {
    60
}

impl AgentConfig {
    /// Create a config with defaults for the given endpoint and API key.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            agent_name: default_agent_name(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_message_length: default_max_message_length(),
            max_context_messages: default_max_context_messages(),
            max_retries: default_max_retries(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout_secs: default_timeout_secs(),
            system_message: None,
        }
    }

    /// Validate every field against its supported range.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::validation("endpoint", "must not be empty", "\"\""));
        }
        if self.api_key.trim().is_empty() {
            return Err(Error::validation("api_key", "must not be empty", "\"\""));
        }

        let (lo, hi) = TEMPERATURE_RANGE;
        if !(lo..=hi).contains(&self.temperature) {
            return Err(Error::validation(
                "temperature",
                format!("must be between {lo} and {hi}"),
                self.temperature,
            ));
        }

        check_range("max_tokens", self.max_tokens, MAX_TOKENS_RANGE)?;
        check_range(
            "max_message_length",
            self.max_message_length,
            MAX_MESSAGE_LENGTH_RANGE,
        )?;
        check_range(
            "max_context_messages",
            self.max_context_messages,
            MAX_CONTEXT_MESSAGES_RANGE,
        )?;
        check_range("max_retries", self.max_retries, MAX_RETRIES_RANGE)?;
        check_range("timeout_secs", self.timeout_secs, TIMEOUT_SECS_RANGE)?;

        Ok(())
    }

    /// Build a validated config from `PARLEY_*` environment variables.
    ///
    /// `PARLEY_ENDPOINT` and `PARLEY_API_KEY` are required; everything else
    /// falls back to its default.
    pub fn from_env() -> Result<Self> {
        let endpoint = require_env("PARLEY_ENDPOINT")?;
        let api_key = require_env("PARLEY_API_KEY")?;

        let mut config = Self::new(endpoint, api_key);

        if let Ok(name) = std::env::var("PARLEY_AGENT_NAME") {
            config.agent_name = name;
        }
        if let Ok(model) = std::env::var("PARLEY_MODEL") {
            config.model = model;
        }
        if let Some(v) = parse_env("PARLEY_TEMPERATURE")? {
            config.temperature = v;
        }
        if let Some(v) = parse_env("PARLEY_MAX_TOKENS")? {
            config.max_tokens = v;
        }
        if let Some(v) = parse_env("PARLEY_MAX_MESSAGE_LENGTH")? {
            config.max_message_length = v;
        }
        if let Some(v) = parse_env("PARLEY_MAX_CONTEXT_MESSAGES")? {
            config.max_context_messages = v;
        }
        if let Some(v) = parse_env("PARLEY_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = parse_env("PARLEY_TIMEOUT_SECS")? {
            config.timeout_secs = v;
        }
        if let Ok(msg) = std::env::var("PARLEY_SYSTEM_MESSAGE") {
            config.system_message = Some(msg);
        }

        config.validate()?;
        Ok(config)
    }

    /// Fingerprint used to key cached provider clients.
    ///
    /// Two configs with the same fingerprint produce interchangeable clients.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.endpoint, self.model, self.temperature, self.max_tokens
        )
    }
}

fn check_range<T>(field: &str, value: T, (lo, hi): (T, T)) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < lo || value > hi {
        return Err(Error::validation(
            field,
            format!("must be between {lo} and {hi}"),
            value,
        ));
    }
    Ok(())
}

fn require_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(Error::validation(
            name,
            "environment variable is required",
            "<unset>",
        )),
    }
}

fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::validation(name, e.to_string(), raw)),
        Err(_) => Ok(None),
    }
}
