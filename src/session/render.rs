//! Plain-text rendering of transcript messages.

use crate::protocol::{ChatMessage, ChatRole, InvocationState, MessagePart, ToolInvocation};

/// Assistant text from this marker on is never shown.
pub const DISCLAIMER_MARKER: &str = "The following Python";

/// Braille spinner frames for in-flight tool calls.
const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Glyph for a resolved tool call.
const DATABASE_GLYPH: &str = "🛢";

/// Prefix for error messages.
pub const ERROR_PREFIX: &str = "✖ ";

/// Returns the displayable part of assistant text.
pub fn display_text(text: &str) -> &str {
    text.split(DISCLAIMER_MARKER).next().unwrap_or_default()
}

/// A tool invocation rendered as a compact chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolChip {
    tool_name: String,
    sql: Option<String>,
    in_flight: bool,
}

impl ToolChip {
    pub fn from_invocation(invocation: &ToolInvocation) -> Self {
        Self {
            tool_name: invocation.tool_name.clone(),
            sql: invocation.sql().map(str::to_string),
            in_flight: invocation.state == InvocationState::PartialCall,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Spinner frame while in flight, the database glyph afterwards.
    pub fn glyph(&self, frame: usize) -> &'static str {
        if self.in_flight {
            SPINNER_FRAMES[frame % SPINNER_FRAMES.len()]
        } else {
            DATABASE_GLYPH
        }
    }

    /// Text placed on the clipboard when the chip is copied.
    pub fn clipboard_text(&self) -> &str {
        self.sql.as_deref().unwrap_or(&self.tool_name)
    }

    pub fn render(&self, frame: usize) -> String {
        let label = match &self.sql {
            Some(sql) => sql.split_whitespace().collect::<Vec<_>>().join(" "),
            None => self.tool_name.clone(),
        };
        format!("[{} {}]", self.glyph(frame), label)
    }
}

/// Returns the chips of a message in emission order.
pub fn tool_chips(message: &ChatMessage) -> Vec<ToolChip> {
    message
        .tool_invocations()
        .map(ToolChip::from_invocation)
        .collect()
}

/// Returns true when a message reports a failure.
pub fn is_error_message(message: &ChatMessage) -> bool {
    message.error_details.is_some() || message.text().starts_with("⚠️")
}

/// Renders a message as display lines.
pub fn render_message(message: &ChatMessage, frame: usize) -> Vec<String> {
    match message.role {
        ChatRole::User => vec![format!("> {}", message.text())],
        ChatRole::System => Vec::new(),
        ChatRole::Assistant => {
            let prefix = if is_error_message(message) { ERROR_PREFIX } else { "" };
            let mut lines = Vec::new();

            if message.parts.is_empty() {
                lines.extend(display_text(&message.content).lines().map(str::to_string));
            }

            for part in &message.parts {
                match part {
                    MessagePart::Text { text } => {
                        lines.extend(display_text(text).lines().map(str::to_string));
                    }
                    MessagePart::ToolInvocation { tool_invocation } => {
                        lines.push(ToolChip::from_invocation(tool_invocation).render(frame));
                    }
                    MessagePart::Other => {}
                }
            }

            if let Some(first) = lines.first_mut() {
                first.insert_str(0, prefix);
            }
            lines
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DbError;
    use serde_json::json;

    fn invocation(state: InvocationState) -> ToolInvocation {
        ToolInvocation {
            tool_call_id: "c1".to_string(),
            tool_name: "query".to_string(),
            args: json!({ "sql": "SELECT *\n  FROM \"Users\"" }),
            state,
            result: None,
        }
    }

    #[test]
    fn test_display_text_truncates_at_marker() {
        assert_eq!(
            display_text("Here are the rows. The following Python code was used..."),
            "Here are the rows. "
        );
        assert_eq!(display_text("No marker ✅"), "No marker ✅");
        assert_eq!(display_text("The following Python"), "");
    }

    #[test]
    fn test_chip_glyphs() {
        let in_flight = ToolChip::from_invocation(&invocation(InvocationState::PartialCall));
        let running = ToolChip::from_invocation(&invocation(InvocationState::Call));
        let done = ToolChip::from_invocation(&invocation(InvocationState::Result));

        assert!(in_flight.is_in_flight());
        assert_eq!(in_flight.glyph(0), "⠋");
        assert_eq!(in_flight.glyph(1), "⠙");
        assert_eq!(running.glyph(3), DATABASE_GLYPH);
        assert_eq!(done.render(0), "[🛢 SELECT * FROM \"Users\"]");
    }

    #[test]
    fn test_chip_clipboard_text_is_raw_sql() {
        let chip = ToolChip::from_invocation(&invocation(InvocationState::Result));
        assert_eq!(chip.clipboard_text(), "SELECT *\n  FROM \"Users\"");
    }

    #[test]
    fn test_render_error_message() {
        let mut message = ChatMessage::assistant("e1");
        message.content = "⚠️ Database Error: boom".to_string();
        message.error_details = Some(DbError::new("boom"));

        let lines = render_message(&message, 0);

        assert_eq!(lines, vec!["✖ ⚠️ Database Error: boom".to_string()]);
    }

    #[test]
    fn test_render_user_message() {
        let lines = render_message(&ChatMessage::user("How many users?"), 0);
        assert_eq!(lines, vec!["> How many users?".to_string()]);
    }
}
