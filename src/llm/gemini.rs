//! Google Gemini LLM client implementation.
//!
//! Implements the LlmClient trait for the Gemini `streamGenerateContent` API.

use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{PgChatError, Result};
use crate::llm::http::send_with_retry;
use crate::llm::sse::{event_stream, EventParser};
use crate::llm::types::{ContentPart, Message, ModelEvent, Role, StepRequest, ToolCall};
use crate::llm::LlmClient;
use crate::protocol::FinishReason;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 90;

/// Gemini API base URL.
const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini client configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Model to use (e.g., "gemini-2.5-flash").
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// API base URL.
    pub base_url: String,
}

impl GeminiConfig {
    /// Creates a new config with the given API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Sets the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Gemini LLM client.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl GeminiClient {
    /// Creates a new Gemini client with the given configuration.
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PgChatError::llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// Builds the `generateContent` request body.
    fn build_request(request: &StepRequest) -> Value {
        let contents: Vec<Value> = request
            .messages
            .iter()
            .filter_map(Self::convert_message)
            .collect();

        let mut body = json!({ "contents": contents });

        if !request.system.is_empty() {
            body["system_instruction"] = json!({ "parts": [{ "text": request.system }] });
        }

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.gemini_parameters(),
                    })
                })
                .collect();
            body["tools"] = json!([{ "function_declarations": declarations }]);
        }

        body
    }

    /// Converts one message to a Gemini `content`; empty messages are dropped.
    fn convert_message(message: &Message) -> Option<Value> {
        let role = match message.role {
            Role::Assistant => "model",
            Role::User | Role::Tool => "user",
        };

        let parts: Vec<Value> = message
            .parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) if text.is_empty() => None,
                ContentPart::Text(text) => Some(json!({ "text": text })),
                ContentPart::ToolCall(call) => Some(json!({
                    "functionCall": { "name": call.name, "args": call.arguments }
                })),
                ContentPart::ToolResult(result) => Some(json!({
                    "functionResponse": {
                        "name": result.tool_name,
                        "response": { "name": result.tool_name, "content": result.content }
                    }
                })),
            })
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(json!({ "role": role, "parts": parts }))
        }
    }

    /// Parses an API error response and returns (error, is_retryable).
    fn parse_error(status: reqwest::StatusCode, body: &str) -> (PgChatError, bool) {
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
            || body.contains("API_KEY_INVALID")
        {
            return (
                PgChatError::llm("Authentication failed. Check your Gemini API key."),
                false,
            );
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return (
                PgChatError::llm("Rate limited. Please wait and try again."),
                true, // Rate limits are retryable
            );
        }

        // 5xx errors are generally retryable
        let is_retryable = status.is_server_error();

        if let Ok(error_response) = serde_json::from_str::<GeminiErrorResponse>(body) {
            return (
                PgChatError::llm(format!(
                    "Gemini API error: {}",
                    error_response.error.message
                )),
                is_retryable,
            );
        }

        (
            PgChatError::llm(format!("Gemini API error ({}): {}", status, body)),
            is_retryable,
        )
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn stream_step(
        &self,
        request: &StepRequest,
    ) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        let body = Self::build_request(request);
        let url = self.stream_url();

        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Starting Gemini step"
        );

        let response = send_with_retry(
            "Gemini",
            || {
                self.client
                    .post(&url)
                    .header("x-goog-api-key", &self.config.api_key)
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            Self::parse_error,
        )
        .await?;

        Ok(event_stream(response, GeminiEventParser::default()))
    }
}

/// Translates `GenerateContentResponse` chunks into model events.
#[derive(Debug, Default)]
struct GeminiEventParser {
    saw_tool_call: bool,
    finish_reason: Option<FinishReason>,
}

impl GeminiEventParser {
    fn map_finish_reason(&self, reason: &str) -> FinishReason {
        match reason {
            "STOP" if self.saw_tool_call => FinishReason::ToolCalls,
            "STOP" => FinishReason::Stop,
            "MAX_TOKENS" => FinishReason::Length,
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
                FinishReason::ContentFilter
            }
            "MALFORMED_FUNCTION_CALL" => FinishReason::Error,
            _ => FinishReason::Other,
        }
    }
}

impl EventParser for GeminiEventParser {
    fn on_data(&mut self, data: &str) -> Result<Vec<ModelEvent>> {
        let chunk: GeminiStreamChunk = serde_json::from_str(data)
            .map_err(|e| PgChatError::llm(format!("Failed to parse Gemini response: {}", e)))?;

        if let Some(error) = chunk.error {
            return Err(PgChatError::llm(format!("Gemini API error: {}", error.message)));
        }

        let mut events = Vec::new();

        let Some(candidate) = chunk.candidates.into_iter().next() else {
            if let Some(reason) = chunk.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(PgChatError::llm(format!("Prompt blocked by Gemini: {}", reason)));
            }
            return Ok(events);
        };

        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if part.thought {
                continue;
            }
            if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                events.push(ModelEvent::TextDelta(text));
            }
            if let Some(call) = part.function_call {
                // Gemini does not assign call ids
                let id = format!("call_{}", uuid::Uuid::new_v4().simple());
                self.saw_tool_call = true;
                events.push(ModelEvent::ToolCallStarted {
                    id: id.clone(),
                    name: call.name.clone(),
                });
                events.push(ModelEvent::ToolCall(ToolCall::new(
                    id,
                    call.name,
                    if call.args.is_null() { json!({}) } else { call.args },
                )));
            }
        }

        if let Some(reason) = candidate.finish_reason {
            self.finish_reason = Some(self.map_finish_reason(&reason));
        }

        Ok(events)
    }

    fn on_end(&mut self) -> Result<Vec<ModelEvent>> {
        let reason = match self.finish_reason {
            Some(reason) => reason,
            None if self.saw_tool_call => FinishReason::ToolCalls,
            None => FinishReason::Unknown,
        };
        Ok(vec![ModelEvent::Finish(reason)])
    }
}

// Gemini API types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<GeminiPromptFeedback>,
    #[serde(default)]
    error: Option<GeminiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}
