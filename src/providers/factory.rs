use super::{
    anthropic::AnthropicProvider, base::Provider, configs::ProviderConfig, openai::OpenAiProvider,
};
use crate::errors::{AgentError, AgentResult};

/// Instantiate the backend named by the configuration.
///
/// Exactly one backend is active per agent instance; selection happens once
/// at construction time.
pub fn get_provider(config: ProviderConfig) -> AgentResult<Box<dyn Provider>> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Box::new(
            OpenAiProvider::new(openai_config)
                .map_err(|e| AgentError::Configuration(e.to_string()))?,
        )),
        ProviderConfig::Anthropic(anthropic_config) => Ok(Box::new(
            AnthropicProvider::new(anthropic_config)
                .map_err(|e| AgentError::Configuration(e.to_string()))?,
        )),
    }
}
