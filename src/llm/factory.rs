//! LLM client factory.
//!
//! Centralizes provider-specific logic for creating LLM clients. The API key
//! arrives with each chat request, so the orchestrator creates a client per
//! request through [`LlmClientFactory`].

use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::{PgChatError, Result};
use crate::llm::{
    GeminiClient, GeminiConfig, LlmClient, LlmProvider, MockLlmClient, OpenAiClient,
    OpenAiConfig,
};

/// Creates LLM clients for incoming requests.
pub trait LlmClientFactory: Send + Sync {
    /// Creates a client authenticated with `api_key`.
    fn create(&self, api_key: &str) -> Result<Arc<dyn LlmClient>>;
}

/// Creates an LLM client for the given provider.
///
/// `model` falls back to the provider's default when empty.
pub fn create_client(
    provider: LlmProvider,
    api_key: &str,
    model: &str,
    timeout_secs: u64,
) -> Result<Box<dyn LlmClient>> {
    let model = if model.is_empty() {
        provider.default_model()
    } else {
        model
    };

    if api_key.trim().is_empty() && provider != LlmProvider::Mock {
        return Err(PgChatError::setup("API key is not configured"));
    }

    match provider {
        LlmProvider::Gemini => Ok(Box::new(GeminiClient::new(
            GeminiConfig::new(api_key, model).with_timeout(timeout_secs),
        )?)),
        LlmProvider::OpenAi => Ok(Box::new(OpenAiClient::new(
            OpenAiConfig::new(api_key, model).with_timeout(timeout_secs),
        )?)),
        LlmProvider::Mock => Ok(Box::new(MockLlmClient::new())),
    }
}

/// Factory backed by the operator configuration.
#[derive(Debug, Clone)]
pub struct ProviderClientFactory {
    provider: LlmProvider,
    model: String,
    timeout_secs: u64,
}

impl ProviderClientFactory {
    pub fn new(provider: LlmProvider, model: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            provider,
            model: model.into(),
            timeout_secs,
        }
    }

    /// Builds a factory from the `[llm]` configuration section.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let provider = config
            .provider
            .parse::<LlmProvider>()
            .map_err(PgChatError::config)?;
        Ok(Self::new(provider, config.model.clone(), config.timeout_secs))
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl LlmClientFactory for ProviderClientFactory {
    fn create(&self, api_key: &str) -> Result<Arc<dyn LlmClient>> {
        create_client(self.provider, api_key, &self.model, self.timeout_secs).map(Arc::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_client() {
        let client = create_client(LlmProvider::Mock, "", "", 30);
        assert!(client.is_ok());
    }

    #[test]
    fn test_create_gemini_without_key_fails() {
        let result = create_client(LlmProvider::Gemini, "  ", "gemini-2.5-flash", 30);
        let err = result.err().unwrap();
        assert!(err.is_setup());
        assert!(err.to_string().contains("API key is not configured"));
    }

    #[test]
    fn test_create_with_provided_key() {
        assert!(create_client(LlmProvider::Gemini, "AIza-test", "", 30).is_ok());
        assert!(create_client(LlmProvider::OpenAi, "sk-test", "gpt-4o", 30).is_ok());
    }

    #[test]
    fn test_factory_from_config() {
        let config = LlmConfig {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 45,
        };

        let factory = ProviderClientFactory::from_config(&config).unwrap();

        assert_eq!(factory.provider(), LlmProvider::OpenAi);
        assert_eq!(factory.model(), "gpt-4o-mini");
        assert!(factory.create("sk-test").is_ok());
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let config = LlmConfig {
            provider: "anthropic".to_string(),
            model: String::new(),
            timeout_secs: 45,
        };

        let err = ProviderClientFactory::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown LLM provider"));
    }
}
