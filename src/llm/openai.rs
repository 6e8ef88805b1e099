//! OpenAI LLM client implementation.
//!
//! Implements the LlmClient trait for OpenAI's chat completions API (GPT-4o, etc.).

use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
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

/// OpenAI API base URL.
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI client configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key for authentication.
    pub api_key: String,
    /// Model to use (e.g., "gpt-4o", "gpt-4o-mini").
    pub model: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl OpenAiConfig {
    /// Creates a new config with the given API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// OpenAI LLM client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiClient {
    /// Creates a new OpenAI client with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PgChatError::llm(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Converts internal messages to OpenAI API format.
    ///
    /// Tool results become one `tool` message each.
    fn convert_messages(system: &str, messages: &[Message]) -> Vec<Value> {
        let mut converted = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            converted.push(json!({ "role": "system", "content": system }));
        }

        for message in messages {
            match message.role {
                Role::User => {
                    converted.push(json!({ "role": "user", "content": message.text() }));
                }
                Role::Assistant => {
                    let text = message.text();
                    let tool_calls: Vec<Value> = message
                        .tool_calls()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect();

                    let mut entry = json!({
                        "role": "assistant",
                        "content": if text.is_empty() { Value::Null } else { json!(text) },
                    });
                    if !tool_calls.is_empty() {
                        entry["tool_calls"] = json!(tool_calls);
                    }
                    converted.push(entry);
                }
                Role::Tool => {
                    for part in &message.parts {
                        if let ContentPart::ToolResult(result) = part {
                            converted.push(json!({
                                "role": "tool",
                                "tool_call_id": result.tool_call_id,
                                "content": result.content.to_string(),
                            }));
                        }
                    }
                }
            }
        }

        converted
    }

    fn build_request(&self, request: &StepRequest) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "messages": Self::convert_messages(&request.system, &request.messages),
            "stream": true,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        body
    }

    /// Parses an API error response and returns (error, is_retryable).
    fn parse_error(status: reqwest::StatusCode, body: &str) -> (PgChatError, bool) {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return (
                PgChatError::llm("Authentication failed. Check your OpenAI API key."),
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

        if let Ok(error_response) = serde_json::from_str::<OpenAiErrorResponse>(body) {
            return (
                PgChatError::llm(format!(
                    "OpenAI API error: {}",
                    error_response.error.message
                )),
                is_retryable,
            );
        }

        (
            PgChatError::llm(format!("OpenAI API error ({}): {}", status, body)),
            is_retryable,
        )
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn stream_step(
        &self,
        request: &StepRequest,
    ) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        let body = self.build_request(request);

        debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Starting OpenAI step"
        );

        let response = send_with_retry(
            "OpenAI",
            || {
                self.client
                    .post(OPENAI_API_URL)
                    .header("Authorization", format!("Bearer {}", self.config.api_key))
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            Self::parse_error,
        )
        .await?;

        Ok(event_stream(response, OpenAiEventParser::default()))
    }
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates streamed tool call fragments (keyed by index) until the step ends.
#[derive(Debug, Default)]
struct OpenAiEventParser {
    tool_calls: BTreeMap<u32, PendingToolCall>,
    finish_reason: Option<FinishReason>,
    finished: bool,
}

impl OpenAiEventParser {
    fn flush(&mut self) -> Result<Vec<ModelEvent>> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;

        let mut events = Vec::new();
        let has_calls = !self.tool_calls.is_empty();
        for (_, call) in std::mem::take(&mut self.tool_calls) {
            let arguments = if call.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.arguments).map_err(|e| {
                    PgChatError::llm(format!(
                        "Invalid arguments for tool call '{}': {}",
                        call.name, e
                    ))
                })?
            };
            events.push(ModelEvent::ToolCall(ToolCall::new(
                call.id, call.name, arguments,
            )));
        }

        let reason = match self.finish_reason {
            Some(reason) => reason,
            None if has_calls => FinishReason::ToolCalls,
            None => FinishReason::Unknown,
        };
        events.push(ModelEvent::Finish(reason));
        Ok(events)
    }
}

impl EventParser for OpenAiEventParser {
    fn on_data(&mut self, data: &str) -> Result<Vec<ModelEvent>> {
        if data == "[DONE]" {
            return self.flush();
        }

        let event: OpenAiStreamEvent = serde_json::from_str(data)
            .map_err(|e| PgChatError::llm(format!("Failed to parse OpenAI response: {}", e)))?;

        if let Some(error) = event.error {
            return Err(PgChatError::llm(format!("OpenAI API error: {}", error.message)));
        }

        let mut events = Vec::new();
        let Some(choice) = event.choices.into_iter().next() else {
            return Ok(events);
        };

        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(ModelEvent::TextDelta(content));
        }

        for fragment in choice.delta.tool_calls.unwrap_or_default() {
            let pending = self.tool_calls.entry(fragment.index).or_default();
            let was_named = !pending.name.is_empty();

            if let Some(id) = fragment.id {
                pending.id = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name {
                    pending.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    pending.arguments.push_str(&arguments);
                }
            }

            if !was_named && !pending.name.is_empty() {
                events.push(ModelEvent::ToolCallStarted {
                    id: pending.id.clone(),
                    name: pending.name.clone(),
                });
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(match reason.as_str() {
                "stop" => FinishReason::Stop,
                "length" => FinishReason::Length,
                "tool_calls" | "function_call" => FinishReason::ToolCalls,
                "content_filter" => FinishReason::ContentFilter,
                _ => FinishReason::Other,
            });
        }

        Ok(events)
    }

    fn on_end(&mut self) -> Result<Vec<ModelEvent>> {
        self.flush()
    }
}

// OpenAI API types

#[derive(Debug, Deserialize)]
struct OpenAiStreamEvent {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    error: Option<OpenAiError>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: String,
}
