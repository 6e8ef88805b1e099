//! Chat transcript types and the chat request body.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// Lifecycle of a tool invocation as seen by the client.
///
/// Ordered so that a state can only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvocationState {
    /// The model has started emitting the call; arguments are not final.
    PartialCall,
    /// Arguments are final; the tool is running.
    Call,
    /// The tool returned (possibly an error-shaped result).
    Result,
}

/// A tool invocation embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    pub state: InvocationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl ToolInvocation {
    /// Returns the raw SQL argument, if this call carries one.
    pub fn sql(&self) -> Option<&str> {
        self.args.get("sql").and_then(Value::as_str)
    }

    /// Moves to `next` if that is a forward transition. Returns whether it moved.
    pub fn advance(&mut self, next: InvocationState) -> bool {
        if next > self.state {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// One element of an assistant (or user) message, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolInvocation {
        tool_invocation: ToolInvocation,
    },
    /// Part types this crate does not interpret (step markers, sources, ...).
    #[serde(other)]
    Other,
}

/// A failed database interaction, as reported to the client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbError {
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
}

impl DbError {
    /// Creates an error with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            tool_name: None,
            sql: None,
        }
    }

    /// Attaches the failing SQL.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Attaches the failing tool name.
    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }
}

/// A chat transcript message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MessagePart>,
    /// Structured error attached to a synthesized error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<DbError>,
}

impl ChatMessage {
    /// Creates a user message with a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: new_message_id(),
            role: ChatRole::User,
            content: text.clone(),
            parts: vec![MessagePart::Text { text }],
            error_details: None,
        }
    }

    /// Creates an empty assistant message to be filled while streaming.
    pub fn assistant(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ChatRole::Assistant,
            content: String::new(),
            parts: Vec::new(),
            error_details: None,
        }
    }

    /// Returns the message text: text parts joined, or `content` for part-less messages.
    pub fn text(&self) -> String {
        if self.parts.is_empty() {
            return self.content.clone();
        }
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Returns the tool invocations in emission order.
    pub fn tool_invocations(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.parts.iter().filter_map(|part| match part {
            MessagePart::ToolInvocation { tool_invocation } => Some(tool_invocation),
            _ => None,
        })
    }

    /// Returns true if this is an assistant message.
    pub fn is_assistant(&self) -> bool {
        self.role == ChatRole::Assistant
    }
}

/// Generates a fresh message id.
pub fn new_message_id() -> String {
    format!("msg-{}", uuid::Uuid::new_v4().simple())
}

/// Input that switches a request into repair mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixRequest {
    pub fix_error: DbError,
    /// User hint; `None` when the user supplied nothing meaningful.
    pub fix_context: Option<String>,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_error: Option<DbError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_context: Option<String>,
}

impl ChatRequest {
    /// Returns the repair input when this request asks for an AutoFix.
    pub fn fix_request(&self) -> Option<FixRequest> {
        self.fix_error.as_ref().map(|fix_error| FixRequest {
            fix_error: fix_error.clone(),
            fix_context: self
                .fix_context
                .as_ref()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        })
    }

    /// Returns the custom instructions, treating blank text as absent.
    pub fn custom_instructions(&self) -> Option<&str> {
        self.custom_instructions
            .as_deref()
            .filter(|c| !c.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_sdk_style_message() {
        let raw = json!({
            "id": "a1",
            "role": "assistant",
            "content": "Here are the users",
            "parts": [
                { "type": "step-start" },
                {
                    "type": "tool-invocation",
                    "toolInvocation": {
                        "toolCallId": "call_1",
                        "toolName": "query",
                        "args": { "sql": "SELECT * FROM \"Users\"" },
                        "state": "result",
                        "result": { "content": [], "isError": false }
                    }
                },
                { "type": "text", "text": "Here are the users" }
            ]
        });

        let message: ChatMessage = serde_json::from_value(raw).unwrap();

        assert_eq!(message.parts.len(), 3);
        assert_eq!(message.parts[0], MessagePart::Other);
        let invocation = message.tool_invocations().next().unwrap();
        assert_eq!(invocation.state, InvocationState::Result);
        assert_eq!(invocation.sql(), Some("SELECT * FROM \"Users\""));
        assert_eq!(message.text(), "Here are the users");
    }

    #[test]
    fn test_tool_invocation_serializes_kebab_state() {
        let part = MessagePart::ToolInvocation {
            tool_invocation: ToolInvocation {
                tool_call_id: "c".to_string(),
                tool_name: "query".to_string(),
                args: json!({}),
                state: InvocationState::PartialCall,
                result: None,
            },
        };

        let value = serde_json::to_value(&part).unwrap();

        assert_eq!(value["type"], "tool-invocation");
        assert_eq!(value["toolInvocation"]["state"], "partial-call");
        assert!(value["toolInvocation"].get("result").is_none());
    }

    #[test]
    fn test_invocation_state_never_reverts() {
        let mut invocation = ToolInvocation {
            tool_call_id: "c".to_string(),
            tool_name: "query".to_string(),
            args: json!({}),
            state: InvocationState::PartialCall,
            result: None,
        };

        assert!(invocation.advance(InvocationState::Call));
        assert!(invocation.advance(InvocationState::Result));
        assert!(!invocation.advance(InvocationState::Call));
        assert_eq!(invocation.state, InvocationState::Result);
    }

    #[test]
    fn test_message_without_parts_uses_content() {
        let message: ChatMessage =
            serde_json::from_value(json!({ "id": "u1", "role": "user", "content": "hi" }))
                .unwrap();
        assert_eq!(message.text(), "hi");
    }

    #[test]
    fn test_request_body_camel_case() {
        let raw = json!({
            "messages": [],
            "apiKey": "k",
            "dbUrl": "postgres://localhost/db",
            "customInstructions": null,
            "fixError": { "message": "column \"Name\" does not exist" },
            "fixContext": "   "
        });

        let request: ChatRequest = serde_json::from_value(raw).unwrap();
        let fix = request.fix_request().unwrap();

        assert_eq!(request.api_key.as_deref(), Some("k"));
        assert_eq!(fix.fix_error.message, "column \"Name\" does not exist");
        assert_eq!(fix.fix_context, None);
        assert_eq!(request.custom_instructions(), None);
    }

    #[test]
    fn test_db_error_omits_absent_fields() {
        let value = serde_json::to_value(DbError::new("boom")).unwrap();
        assert_eq!(value, json!({ "message": "boom" }));

        let value =
            serde_json::to_value(DbError::new("boom").with_tool("query").with_sql("SELECT 1"))
                .unwrap();
        assert_eq!(
            value,
            json!({ "message": "boom", "toolName": "query", "sql": "SELECT 1" })
        );
    }
}
