//! Folds data stream parts into an assistant message.

use serde_json::Value;

use crate::protocol::{
    new_message_id, ChatMessage, DbError, InvocationState, MessagePart, StreamPart,
    ToolInvocation,
};

/// Builds one assistant message from the parts of a turn.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    message: ChatMessage,
    id_assigned: bool,
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self {
            message: ChatMessage::assistant(new_message_id()),
            id_assigned: false,
        }
    }

    /// Applies one part.
    pub fn apply(&mut self, part: StreamPart) {
        match part {
            StreamPart::StartStep { message_id } => {
                if !self.id_assigned {
                    self.message.id = message_id;
                    self.id_assigned = true;
                }
            }
            StreamPart::Text(text) => self.push_text(&text),
            StreamPart::ToolCallStart {
                tool_call_id,
                tool_name,
            } => {
                if self.invocation_mut(&tool_call_id).is_none() {
                    self.push_invocation(tool_call_id, tool_name, Value::Null, InvocationState::PartialCall);
                }
            }
            StreamPart::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => match self.invocation_mut(&tool_call_id) {
                Some(invocation) => {
                    if invocation.advance(InvocationState::Call) {
                        invocation.args = args;
                    }
                }
                None => self.push_invocation(tool_call_id, tool_name, args, InvocationState::Call),
            },
            StreamPart::ToolResult {
                tool_call_id,
                result,
            } => match self.invocation_mut(&tool_call_id) {
                Some(invocation) => {
                    if invocation.advance(InvocationState::Result) {
                        invocation.result = Some(result);
                    }
                }
                None => {
                    tracing::debug!(tool_call_id = %tool_call_id, "Result for unknown tool call");
                }
            },
            StreamPart::Data(values) => {
                for value in values {
                    if let Some(details) = value
                        .get("dbError")
                        .and_then(|v| serde_json::from_value::<DbError>(v.clone()).ok())
                        .filter(|d| !d.message.is_empty())
                    {
                        self.message.error_details = Some(details);
                    }
                }
            }
            StreamPart::Error(text) => {
                let separator = if self.message.content.is_empty() { "" } else { "\n\n" };
                self.message.content.push_str(separator);
                self.message.content.push_str(&text);
                self.message.parts.push(MessagePart::Text { text });
            }
            StreamPart::FinishStep { .. } | StreamPart::FinishMessage { .. } => {}
        }
    }

    /// Returns the message built so far.
    pub fn message(&self) -> &ChatMessage {
        &self.message
    }

    pub fn finish(self) -> ChatMessage {
        self.message
    }

    fn push_text(&mut self, text: &str) {
        self.message.content.push_str(text);
        match self.message.parts.last_mut() {
            Some(MessagePart::Text { text: existing }) => existing.push_str(text),
            _ => self.message.parts.push(MessagePart::Text {
                text: text.to_string(),
            }),
        }
    }

    fn push_invocation(
        &mut self,
        tool_call_id: String,
        tool_name: String,
        args: Value,
        state: InvocationState,
    ) {
        self.message.parts.push(MessagePart::ToolInvocation {
            tool_invocation: ToolInvocation {
                tool_call_id,
                tool_name,
                args,
                state,
                result: None,
            },
        });
    }

    fn invocation_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolInvocation> {
        self.message.parts.iter_mut().find_map(|part| match part {
            MessagePart::ToolInvocation { tool_invocation }
                if tool_invocation.tool_call_id == tool_call_id =>
            {
                Some(tool_invocation)
            }
            _ => None,
        })
    }
}
