//! How a chat session reaches the orchestrator.
//!
//! [`HttpTransport`] talks to a running server; [`InProcessTransport`] calls an
//! [`Orchestrator`] directly and produces the same [`ChatReply`] shape.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PgChatError, Result};
use crate::orchestrator::{ChatOutcome, Orchestrator};
use crate::protocol::{ChatRequest, ErrorEnvelope, StreamDecoder, StreamPart, DB_ERROR_HEADER};

/// Body of a chat reply.
pub enum ReplyBody {
    /// Data stream parts as they arrive.
    Stream(BoxStream<'static, Result<StreamPart>>),
    /// An error envelope.
    Envelope(ErrorEnvelope),
}

/// A reply to one chat request.
#[derive(Debug)]
pub struct ChatReply {
    /// Raw `X-DB-Error` header, when the server sent one.
    pub db_error_header: Option<String>,
    pub body: ReplyBody,
}

impl std::fmt::Debug for ReplyBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Envelope(envelope) => f.debug_tuple("Envelope").field(envelope).finish(),
        }
    }
}

impl ChatReply {
    /// Reply for an envelope, with the header the server would have sent.
    pub fn from_envelope(envelope: ErrorEnvelope) -> Self {
        Self {
            db_error_header: Some(envelope.header_value()),
            body: ReplyBody::Envelope(envelope),
        }
    }
}

/// Sends chat requests.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply>;
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Server base URL, e.g. `http://127.0.0.1:3000`.
    pub base_url: String,
    /// Request timeout in seconds; covers the whole streamed reply.
    pub timeout_secs: u64,
}

impl HttpTransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: 180,
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Transport that posts to `/api/chat` on a running server.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PgChatError::config(format!("Failed to create HTTP client: {e}")))?;

        let base = url::Url::parse(&config.base_url)
            .map_err(|e| PgChatError::config(format!("Invalid server URL: {e}")))?;
        let endpoint = base
            .join("/api/chat")
            .map_err(|e| PgChatError::config(format!("Invalid server URL: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    PgChatError::stream(format!(
                        "Cannot reach chat server at {}. Is `pg-chat serve` running?",
                        self.endpoint
                    ))
                } else {
                    PgChatError::stream(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PgChatError::stream(format!(
                "Chat server returned {status}: {body}"
            )));
        }

        let db_error_header = response
            .headers()
            .get(DB_ERROR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let body = if is_json {
            let envelope: ErrorEnvelope = response
                .json()
                .await
                .map_err(|e| PgChatError::stream(format!("Malformed error envelope: {e}")))?;
            ReplyBody::Envelope(envelope)
        } else {
            ReplyBody::Stream(part_stream(response))
        };

        Ok(ChatReply {
            db_error_header,
            body,
        })
    }
}

struct PartStreamState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: StreamDecoder,
    pending: VecDeque<Result<StreamPart>>,
    finished: bool,
}

/// Decodes a streamed response body into parts.
fn part_stream(response: reqwest::Response) -> BoxStream<'static, Result<StreamPart>> {
    let state = PartStreamState {
        body: response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed(),
        decoder: StreamDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => state.pending.extend(state.decoder.push(&bytes)),
                Some(Err(e)) => {
                    state
                        .pending
                        .push_back(Err(PgChatError::stream(format!("Stream interrupted: {e}"))));
                    state.finished = true;
                }
                None => {
                    state.pending.extend(state.decoder.finish());
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

/// Transport that runs turns in this process.
pub struct InProcessTransport {
    orchestrator: Arc<Orchestrator>,
}

impl InProcessTransport {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl ChatTransport for InProcessTransport {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply> {
        Ok(match self.orchestrator.handle(request.clone()).await {
            ChatOutcome::Stream(parts) => ChatReply {
                db_error_header: None,
                body: ReplyBody::Stream(parts.map(Ok).boxed()),
            },
            ChatOutcome::Envelope(envelope) => ChatReply::from_envelope(envelope),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_path() {
        let transport =
            HttpTransport::new(HttpTransportConfig::new("http://127.0.0.1:3000")).unwrap();
        assert_eq!(transport.endpoint(), "http://127.0.0.1:3000/api/chat");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpTransport::new(HttpTransportConfig::new("not a url")).is_err());
    }

    #[test]
    fn test_envelope_reply_carries_header() {
        let envelope = ErrorEnvelope::setup_failure("Database URL is not configured");
        let reply = ChatReply::from_envelope(envelope);
        assert!(reply
            .db_error_header
            .as_deref()
            .unwrap()
            .contains("Database URL is not configured"));
    }
}
