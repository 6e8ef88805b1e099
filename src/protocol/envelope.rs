//! JSON error envelope and the `X-DB-Error` header.
//!
//! Every failure the orchestrator cannot recover from inside a model turn is
//! answered with status 200 and this envelope, so the client can render it as
//! a chat bubble. The header repeats the structured details so the client never
//! has to parse the prose.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::{ChatMessage, ChatRole, DbError, MessagePart};

/// Side-channel header carrying a JSON-encoded [`DbError`].
pub const DB_ERROR_HEADER: &str = "x-db-error";

/// Error payload returned instead of a data stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub error: bool,
    pub error_type: String,
    pub error_details: DbError,
}

impl ErrorEnvelope {
    fn new(content: String, details: DbError) -> Self {
        Self {
            id: format!("error-{}", chrono::Utc::now().timestamp_millis()),
            role: ChatRole::Assistant,
            content,
            error: true,
            error_type: "database".to_string(),
            error_details: details,
        }
    }

    /// Envelope for failures before the model was called.
    pub fn setup_failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(format!("⚠️ Error: {message}"), DbError::new(message))
    }

    /// Envelope for failures once the model call has started.
    pub fn stream_failure(details: DbError) -> Self {
        Self::new(stream_failure_text(&details.message), details)
    }

    /// Returns the `X-DB-Error` header value.
    ///
    /// Non-ASCII characters are `\u`-escaped so the value is a legal header
    /// while still parsing back to the same JSON.
    pub fn header_value(&self) -> String {
        let json = serde_json::to_string(&self.error_details).unwrap_or_else(|_| {
            serde_json::json!({ "message": self.error_details.message }).to_string()
        });
        escape_non_ascii(&json)
    }

    /// Converts the envelope into a transcript message.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            role: ChatRole::Assistant,
            content: self.content.clone(),
            parts: vec![MessagePart::Text { text: self.content }],
            error_details: Some(self.error_details),
        }
    }
}

/// User-facing text for a database error raised after the model call started.
pub fn stream_failure_text(message: &str) -> String {
    format!(
        "⚠️ Database Error: {message}\n\nUse the \"AutoFix\" button to attempt to fix this error."
    )
}

fn escape_non_ascii(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        if ch.is_ascii() {
            out.push(ch);
        } else {
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

/// Parses an `X-DB-Error` header value.
///
/// Returns `None` for anything that is not a JSON object with a string
/// `message`; never fails.
pub fn parse_db_error_header(raw: &str) -> Option<DbError> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring unparseable X-DB-Error header");
            return None;
        }
    };

    let object = value.as_object()?;
    let message = object.get("message")?.as_str()?.to_string();
    let text_field = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    Some(DbError {
        message,
        tool_name: text_field("toolName"),
        sql: text_field("sql"),
    })
}
