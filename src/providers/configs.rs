use std::env;

use crate::errors::{AgentError, AgentResult};

pub const DEFAULT_ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const DEFAULT_OPENAI_HOST: &str = "https://api.openai.com";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-7-sonnet-20250219";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4-turbo";

/// Deterministic-leaning default shared by both backends
pub const DEFAULT_TEMPERATURE: f32 = 0.5;

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
}

impl ProviderConfig {
    /// Read the provider selection and credentials from the environment.
    ///
    /// `LLM_PROVIDER` picks the backend family (default `anthropic`); the
    /// per-family variables follow: `ANTHROPIC_API_KEY`/`ANTHROPIC_MODEL` and
    /// `OPENAI_API_KEY`/`OPENAI_MODEL`.
    pub fn from_env() -> AgentResult<Self> {
        dotenv::dotenv().ok();
        let name = env::var("LLM_PROVIDER").unwrap_or_else(|_| "anthropic".to_string());
        Self::from_lookup(&name, &|key| env::var(key).ok())
    }

    /// Resolve a configuration from a backend name and a variable lookup.
    ///
    /// Selection is static: an unsupported name is a fatal configuration
    /// error, not something the caller can recover from at runtime.
    pub fn from_lookup(
        name: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> AgentResult<Self> {
        match name.to_lowercase().as_str() {
            "anthropic" => {
                let api_key = lookup("ANTHROPIC_API_KEY").ok_or_else(|| {
                    AgentError::Configuration("ANTHROPIC_API_KEY is not set".to_string())
                })?;
                Ok(ProviderConfig::Anthropic(AnthropicProviderConfig {
                    host: lookup("ANTHROPIC_HOST")
                        .unwrap_or_else(|| DEFAULT_ANTHROPIC_HOST.to_string()),
                    api_key,
                    model: lookup("ANTHROPIC_MODEL")
                        .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
                    temperature: Some(DEFAULT_TEMPERATURE),
                    max_tokens: None,
                }))
            }
            "openai" => {
                let api_key = lookup("OPENAI_API_KEY").ok_or_else(|| {
                    AgentError::Configuration("OPENAI_API_KEY is not set".to_string())
                })?;
                Ok(ProviderConfig::OpenAi(OpenAiProviderConfig {
                    host: lookup("OPENAI_HOST").unwrap_or_else(|| DEFAULT_OPENAI_HOST.to_string()),
                    api_key,
                    model: lookup("OPENAI_MODEL")
                        .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                    temperature: Some(DEFAULT_TEMPERATURE),
                    max_tokens: None,
                }))
            }
            other => Err(AgentError::Configuration(format!(
                "Unsupported provider: {}",
                other
            ))),
        }
    }
}
