//! Data stream encoding.
//!
//! While a turn runs, the server writes one part per line as `<code>:<json>\n`.
//! The codes follow the widely used AI SDK data stream format so browser chat
//! SDKs can consume the stream directly.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{PgChatError, Result};

/// Response header announcing the data stream format.
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";

/// Why a step or message finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
    Unknown,
}

/// One event of the data stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPart {
    /// `f`: a model step begins.
    StartStep { message_id: String },
    /// `0`: text delta.
    Text(String),
    /// `b`: the model started a tool call.
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
    },
    /// `9`: a complete tool call.
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },
    /// `a`: a tool result.
    ToolResult { tool_call_id: String, result: Value },
    /// `e`: a model step finished.
    FinishStep {
        finish_reason: FinishReason,
        is_continued: bool,
    },
    /// `d`: the whole turn finished.
    FinishMessage { finish_reason: FinishReason },
    /// `2`: arbitrary JSON data.
    Data(Vec<Value>),
    /// `3`: an error message.
    Error(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartStepPayload {
    message_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallPayload {
    tool_call_id: String,
    tool_name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultPayload {
    tool_call_id: String,
    #[serde(default)]
    result: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinishPayload {
    finish_reason: FinishReason,
    #[serde(default)]
    is_continued: bool,
}

impl StreamPart {
    /// Returns the single-character type code.
    pub fn code(&self) -> char {
        match self {
            Self::StartStep { .. } => 'f',
            Self::Text(_) => '0',
            Self::ToolCallStart { .. } => 'b',
            Self::ToolCall { .. } => '9',
            Self::ToolResult { .. } => 'a',
            Self::FinishStep { .. } => 'e',
            Self::FinishMessage { .. } => 'd',
            Self::Data(_) => '2',
            Self::Error(_) => '3',
        }
    }

    /// Encodes the part as one newline-terminated line.
    pub fn encode(&self) -> String {
        let payload = match self {
            Self::StartStep { message_id } => json!({ "messageId": message_id }),
            Self::Text(text) => json!(text),
            Self::ToolCallStart {
                tool_call_id,
                tool_name,
            } => json!({ "toolCallId": tool_call_id, "toolName": tool_name }),
            Self::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => json!({ "toolCallId": tool_call_id, "toolName": tool_name, "args": args }),
            Self::ToolResult {
                tool_call_id,
                result,
            } => json!({ "toolCallId": tool_call_id, "result": result }),
            Self::FinishStep {
                finish_reason,
                is_continued,
            } => json!({ "finishReason": finish_reason, "isContinued": is_continued }),
            Self::FinishMessage { finish_reason } => json!({ "finishReason": finish_reason }),
            Self::Data(values) => json!(values),
            Self::Error(message) => json!(message),
        };
        format!("{}:{}\n", self.code(), payload)
    }

    /// Decodes one line. Unknown type codes decode to `None`.
    pub fn decode(line: &str) -> Result<Option<Self>> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Ok(None);
        }

        let (code, payload) = line
            .split_once(':')
            .ok_or_else(|| PgChatError::stream(format!("Malformed stream line: {line}")))?;

        let malformed =
            |e: serde_json::Error| PgChatError::stream(format!("Malformed '{code}' part: {e}"));

        let part = match code {
            "f" => {
                let p: StartStepPayload = serde_json::from_str(payload).map_err(malformed)?;
                Self::StartStep {
                    message_id: p.message_id,
                }
            }
            "0" => Self::Text(serde_json::from_str(payload).map_err(malformed)?),
            "b" => {
                let p: ToolCallPayload = serde_json::from_str(payload).map_err(malformed)?;
                Self::ToolCallStart {
                    tool_call_id: p.tool_call_id,
                    tool_name: p.tool_name,
                }
            }
            "9" => {
                let p: ToolCallPayload = serde_json::from_str(payload).map_err(malformed)?;
                Self::ToolCall {
                    tool_call_id: p.tool_call_id,
                    tool_name: p.tool_name,
                    args: p.args,
                }
            }
            "a" => {
                let p: ToolResultPayload = serde_json::from_str(payload).map_err(malformed)?;
                Self::ToolResult {
                    tool_call_id: p.tool_call_id,
                    result: p.result,
                }
            }
            "e" => {
                let p: FinishPayload = serde_json::from_str(payload).map_err(malformed)?;
                Self::FinishStep {
                    finish_reason: p.finish_reason,
                    is_continued: p.is_continued,
                }
            }
            "d" => {
                let p: FinishPayload = serde_json::from_str(payload).map_err(malformed)?;
                Self::FinishMessage {
                    finish_reason: p.finish_reason,
                }
            }
            "2" => Self::Data(serde_json::from_str(payload).map_err(malformed)?),
            "3" => Self::Error(serde_json::from_str(payload).map_err(malformed)?),
            _ => {
                tracing::debug!(code, "Skipping unknown stream part");
                return Ok(None);
            }
        };

        Ok(Some(part))
    }
}

/// Incremental decoder for a byte stream of encoded parts.
///
/// Network chunks can split lines anywhere, including inside a UTF-8 sequence,
/// so bytes are buffered until a full line is available.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
}

impl StreamDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every part completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamPart>> {
        self.buffer.extend_from_slice(chunk);
        let mut parts = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            match StreamPart::decode(&line) {
                Ok(Some(part)) => parts.push(Ok(part)),
                Ok(None) => {}
                Err(e) => parts.push(Err(e)),
            }
        }

        parts
    }

    /// Decodes whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<Result<StreamPart>> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        StreamPart::decode(&String::from_utf8_lossy(&rest)).transpose()
    }
}
