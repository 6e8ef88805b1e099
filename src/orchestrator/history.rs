//! Converts the client transcript into model history.
//!
//! An assistant message that used tools becomes alternating assistant and
//! tool messages, so each call is followed by its result before any text the
//! model produced afterwards.

use crate::llm::{ContentPart, Message, Role, ToolCall, ToolResult};
use crate::protocol::{ChatMessage, ChatRole, InvocationState, MessagePart};

/// Builds the model history from transcript messages.
pub fn to_model_messages(messages: &[ChatMessage]) -> Vec<Message> {
    let mut history = Vec::with_capacity(messages.len());

    for message in messages {
        match message.role {
            ChatRole::User => {
                let text = message.text();
                if !text.trim().is_empty() {
                    history.push(Message::user(text));
                }
            }
            ChatRole::Assistant => append_assistant(&mut history, message),
            ChatRole::System => {}
        }
    }

    history
}

fn append_assistant(history: &mut Vec<Message>, message: &ChatMessage) {
    if message.parts.is_empty() {
        if !message.content.is_empty() {
            history.push(Message::assistant(message.content.clone()));
        }
        return;
    }

    let mut assistant: Vec<ContentPart> = Vec::new();
    let mut results: Vec<ToolResult> = Vec::new();

    for part in &message.parts {
        match part {
            MessagePart::Text { text } => {
                if !results.is_empty() {
                    flush(history, &mut assistant, &mut results);
                }
                if !text.is_empty() {
                    assistant.push(ContentPart::Text(text.clone()));
                }
            }
            MessagePart::ToolInvocation { tool_invocation } => {
                // Calls without a result cannot be replayed to the model
                if tool_invocation.state != InvocationState::Result {
                    continue;
                }
                assistant.push(ContentPart::ToolCall(ToolCall::new(
                    tool_invocation.tool_call_id.clone(),
                    tool_invocation.tool_name.clone(),
                    tool_invocation.args.clone(),
                )));
                results.push(ToolResult {
                    tool_call_id: tool_invocation.tool_call_id.clone(),
                    tool_name: tool_invocation.tool_name.clone(),
                    content: tool_invocation.result.clone().unwrap_or_default(),
                });
            }
            MessagePart::Other => {}
        }
    }

    flush(history, &mut assistant, &mut results);
}

fn flush(history: &mut Vec<Message>, assistant: &mut Vec<ContentPart>, results: &mut Vec<ToolResult>) {
    if !assistant.is_empty() {
        history.push(Message::new(Role::Assistant, std::mem::take(assistant)));
    }
    if !results.is_empty() {
        history.push(Message::tool_results(std::mem::take(results)));
    }
}
