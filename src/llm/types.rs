//! Message types for LLM communication.
//!
//! A provider-neutral conversation: each message is a role plus an ordered list
//! of parts, so an assistant turn can mix text with tool calls and a tool turn
//! can carry several results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::FinishReason;

use super::tools::ToolDefinition;

/// A tool call requested by the LLM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call (used to match results).
    pub id: String,
    /// Name of the tool to call.
    pub name: String,
    /// JSON arguments for the tool.
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this result is for.
    pub tool_call_id: String,
    /// Name of the tool that produced it (Gemini matches results by name).
    pub tool_name: String,
    /// The result as returned by the tool.
    pub content: Value,
}

/// Role of a message in a conversation.
///
/// The system prompt travels separately in [`StepRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message (human input).
    User,
    /// Assistant message (LLM response).
    Assistant,
    /// Tool results fed back to the model.
    Tool,
}

impl Role {
    /// Returns the role as a string for API requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// One element of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContentPart {
    Text(String),
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message sender.
    pub role: Role,
    /// Ordered content.
    pub parts: Vec<ContentPart>,
}

impl Message {
    /// Creates a new message with the given role and parts.
    pub fn new(role: Role, parts: Vec<ContentPart>) -> Self {
        Self { role, parts }
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentPart::Text(content.into())])
    }

    /// Creates an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentPart::Text(content.into())])
    }

    /// Creates a message carrying tool results.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self::new(
            Role::Tool,
            results.into_iter().map(ContentPart::ToolResult).collect(),
        )
    }

    /// Returns the concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Returns the tool calls in this message.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.parts.iter().filter_map(|part| match part {
            ContentPart::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    /// Returns true if the message has no parts.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

/// Input for one model step.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// An event produced while a model step streams.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// A chunk of assistant text.
    TextDelta(String),
    /// The model began a tool call; arguments are still arriving.
    ToolCallStarted { id: String, name: String },
    /// A complete tool call.
    ToolCall(ToolCall),
    /// The step finished.
    Finish(FinishReason),
}
