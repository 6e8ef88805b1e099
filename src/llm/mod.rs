//! LLM integration for pg-chat.
//!
//! Provides the streaming client trait the tool loop drives, one implementation
//! per provider, and a scripted mock for tests.

pub mod factory;
pub mod gemini;
mod http;
pub mod mock;
pub mod openai;
pub mod sse;
pub mod tools;
pub mod types;

pub use factory::{create_client, LlmClientFactory, ProviderClientFactory};
pub use gemini::{GeminiClient, GeminiConfig};
pub use mock::{MockLlmClient, MockStep};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use tools::ToolDefinition;
pub use types::{ContentPart, Message, ModelEvent, Role, StepRequest, ToolCall, ToolResult};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::str::FromStr;

use crate::error::Result;

/// Trait for LLM clients that can run one streaming model step.
///
/// Implementations must be thread-safe (Send + Sync) to support async operations.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Starts one model step.
    ///
    /// Fails if the request could not be started; failures after that arrive
    /// as `Err` items of the stream. A well-behaved stream ends with
    /// [`ModelEvent::Finish`].
    async fn stream_step(
        &self,
        request: &StepRequest,
    ) -> Result<BoxStream<'static, Result<ModelEvent>>>;
}

/// LLM provider type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    /// Google Gemini
    #[default]
    Gemini,
    /// OpenAI (GPT-4o, etc.)
    OpenAi,
    /// Mock client for testing (no API key required)
    Mock,
}

impl LlmProvider {
    /// Returns the provider as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }

    /// Returns the model used when the configuration names none.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.5-flash",
            Self::OpenAi => "gpt-4o",
            Self::Mock => "mock",
        }
    }
}

impl FromStr for LlmProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "mock" => Ok(Self::Mock),
            _ => Err(format!("Unknown LLM provider: {}", s)),
        }
    }
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_provider_from_str() {
        assert_eq!(
            "gemini".parse::<LlmProvider>().unwrap(),
            LlmProvider::Gemini
        );
        assert_eq!(
            "Google".parse::<LlmProvider>().unwrap(),
            LlmProvider::Gemini
        );
        assert_eq!(
            "OpenAI".parse::<LlmProvider>().unwrap(),
            LlmProvider::OpenAi
        );
        assert_eq!("mock".parse::<LlmProvider>().unwrap(), LlmProvider::Mock);
        assert!("anthropic".parse::<LlmProvider>().is_err());
    }

    #[test]
    fn test_provider_display() {
        assert_eq!(format!("{}", LlmProvider::OpenAi), "openai");
    }

    #[test]
    fn test_provider_default() {
        assert_eq!(LlmProvider::default(), LlmProvider::Gemini);
        assert_eq!(LlmProvider::default().default_model(), "gemini-2.5-flash");
    }

    #[tokio::test]
    async fn test_mock_client_implements_trait() {
        let client: Box<dyn LlmClient> = Box::new(MockLlmClient::new().with_text("Hello ✅"));
        let request = StepRequest {
            system: String::new(),
            messages: vec![Message::user("Show me all users")],
            tools: Vec::new(),
        };

        let events: Vec<ModelEvent> = client
            .stream_step(&request)
            .await
            .unwrap()
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events[0], ModelEvent::TextDelta("Hello ✅".to_string()));
    }
}
