//! Builds a [`DbError`] from a failed turn.
//!
//! Structured fields are used when the error carries them. Otherwise the
//! error text is scanned for `"message": "..."` and `"sql": "..."` fragments,
//! which provider and tool errors often embed as raw JSON. Only then does the
//! error's own message, or a fixed placeholder, apply.

use crate::error::PgChatError;
use crate::protocol::DbError;

use super::prompt::UNKNOWN_DB_ERROR;

const MESSAGE_PATTERN: &str = r#""message":\s*"([^"]+)""#;
const SQL_PATTERN: &str = r#""sql":\s*"([^"]+)""#;

/// Extracts the client-facing database error from a turn failure.
pub fn db_error_from(error: &PgChatError) -> DbError {
    if let PgChatError::ToolCall {
        tool_name,
        sql,
        message,
    } = error
    {
        return DbError {
            message: non_blank(message).unwrap_or(UNKNOWN_DB_ERROR).to_string(),
            tool_name: Some(tool_name.clone()),
            sql: sql.clone().filter(|s| !s.trim().is_empty()),
        };
    }

    let serialized = error.to_string();
    let own_message = error.message();

    let message = capture(MESSAGE_PATTERN, &serialized)
        .or_else(|| non_blank(&own_message).map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_DB_ERROR.to_string());

    DbError {
        message,
        tool_name: None,
        sql: capture(SQL_PATTERN, &serialized),
    }
}

fn capture(pattern: &str, text: &str) -> Option<String> {
    regex::Regex::new(pattern)
        .ok()
        .and_then(|re| re.captures(text))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn non_blank(text: &str) -> Option<&str> {
    (!text.trim().is_empty()).then_some(text)
}
