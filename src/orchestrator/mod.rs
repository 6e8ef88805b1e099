//! Per-request chat orchestration.
//!
//! [`Orchestrator::handle`] validates a chat request, opens a tool session,
//! and runs a bounded [`ToolLoop`] in a background task whose output is
//! forwarded as a data stream. Failures are reported in one of three ways:
//!
//! 1. before the model is called: a setup [`ErrorEnvelope`]
//! 2. before the first stream part: a stream-failure [`ErrorEnvelope`]
//! 3. after streaming started: a data part with the [`DbError`] followed by an
//!    error part
//!
//! The tool session is closed exactly once per request on every path.

pub mod adapter;
pub mod extract;
pub mod history;
pub mod prompt;
pub mod tool_loop;

pub use adapter::{
    database_error_result, DbErrorGuard, SessionToolHandler, ToolCatalog, ToolHandler,
};
pub use extract::db_error_from;
pub use tool_loop::{PartSender, ToolLoop};

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::LimitsConfig;
use crate::error::{PgChatError, Result};
use crate::llm::{LlmClient, LlmClientFactory, Message};
use crate::mcp::{ToolConnector, ToolSession};
use crate::protocol::{
    new_message_id, stream_failure_text, ChatRequest, DbError, ErrorEnvelope, StreamPart,
};

/// Buffered parts between the loop task and the response body.
const PART_CHANNEL_CAPACITY: usize = 64;

/// Database URL schemes the query tool understands.
const POSTGRES_SCHEMES: [&str; 2] = ["postgres", "postgresql"];

/// Which prompt and step ceiling a request runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnMode {
    Conversation,
    Repair,
}

impl TurnMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Repair => "repair",
        }
    }
}

/// Response to one chat request.
pub enum ChatOutcome {
    /// Data stream parts, ready to be encoded.
    Stream(BoxStream<'static, StreamPart>),
    /// A failure reported as a single JSON envelope.
    Envelope(ErrorEnvelope),
}

impl std::fmt::Debug for ChatOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Envelope(envelope) => f.debug_tuple("Envelope").field(envelope).finish(),
        }
    }
}

/// Everything a turn needs once setup has succeeded.
struct PreparedTurn {
    mode: TurnMode,
    client: Arc<dyn LlmClient>,
    session: Arc<dyn ToolSession>,
    catalog: ToolCatalog,
    system: String,
    history: Vec<Message>,
    max_steps: usize,
}

/// Handles chat requests.
///
/// Holds no per-request state; every request brings its own history and
/// credentials.
pub struct Orchestrator {
    llm: Arc<dyn LlmClientFactory>,
    tools: Arc<dyn ToolConnector>,
    limits: LimitsConfig,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClientFactory>,
        tools: Arc<dyn ToolConnector>,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            llm,
            tools,
            limits,
            shutdown: CancellationToken::new(),
        }
    }

    /// Uses `token` to abort in-flight turns on shutdown.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Returns the token that aborts every in-flight turn when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Handles one chat request.
    pub async fn handle(&self, request: ChatRequest) -> ChatOutcome {
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let span = tracing::info_span!("chat", request_id = %&request_id[..8]);

        async move {
            let turn = match self.prepare(&request).await {
                Ok(turn) => turn,
                Err(e) => {
                    tracing::warn!(error = %e, "Chat request setup failed");
                    return ChatOutcome::Envelope(ErrorEnvelope::setup_failure(e.message()));
                }
            };

            tracing::info!(
                mode = turn.mode.as_str(),
                messages = request.messages.len(),
                max_steps = turn.max_steps,
                "Starting chat turn"
            );

            let mut rx = self.spawn_turn(turn);

            match rx.recv().await {
                Some(Ok(first)) => {
                    let rest = ReceiverStream::new(rx).flat_map(|item| {
                        stream::iter(match item {
                            Ok(part) => vec![part],
                            Err(e) => failure_parts(&e),
                        })
                    });
                    ChatOutcome::Stream(stream::once(async move { first }).chain(rest).boxed())
                }
                Some(Err(e)) => {
                    ChatOutcome::Envelope(ErrorEnvelope::stream_failure(db_error_from(&e)))
                }
                None => ChatOutcome::Envelope(ErrorEnvelope::stream_failure(DbError::new(
                    prompt::UNKNOWN_DB_ERROR,
                ))),
            }
        }
        .instrument(span)
        .await
    }

    /// Validates the request and acquires the model client and tool session.
    ///
    /// Closes the session again if anything after connecting fails, including
    /// the caller dropping this future.
    async fn prepare(&self, request: &ChatRequest) -> Result<PreparedTurn> {
        let api_key = request
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| PgChatError::setup("API key is not configured"))?;

        let db_url = request
            .db_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| PgChatError::setup("Database URL is not configured"))?;
        validate_db_url(db_url)?;

        let client = self.llm.create(api_key)?;

        let guard = SessionGuard::new(self.tools.connect(db_url).await?);
        let definitions = match guard.session().list_tools().await {
            Ok(definitions) => definitions,
            Err(e) => {
                close_session(guard.release().as_ref()).await;
                return Err(e);
            }
        };
        tracing::debug!(tools = definitions.len(), "Tool session ready");

        let custom_instructions = request.custom_instructions();

        let (mode, system, history, max_steps) = match request.fix_request() {
            Some(fix) => (
                TurnMode::Repair,
                prompt::repair_prompt(&fix, custom_instructions),
                vec![Message::user(prompt::repair_user_message(&fix))],
                self.limits.repair_max_steps,
            ),
            None => (
                TurnMode::Conversation,
                prompt::conversation_prompt(chrono::Local::now(), custom_instructions),
                history::to_model_messages(&request.messages),
                self.limits.conversation_max_steps,
            ),
        };

        let session = guard.release();
        let catalog = ToolCatalog::for_session(Arc::clone(&session), definitions);

        Ok(PreparedTurn {
            mode,
            client,
            session,
            catalog,
            system,
            history,
            max_steps,
        })
    }

    /// Runs the turn in a background task and returns its output channel.
    ///
    /// The task stops when the receiver is dropped, on shutdown, or when the
    /// request duration ceiling is hit. The session is closed before the
    /// terminal error, if any, is sent.
    fn spawn_turn(&self, turn: PreparedTurn) -> mpsc::Receiver<Result<StreamPart>> {
        let (tx, rx) = mpsc::channel(PART_CHANNEL_CAPACITY);
        let cancel = self.shutdown.child_token();
        let max_duration = self.limits.max_request_duration();
        let max_secs = self.limits.max_request_secs;

        let PreparedTurn {
            client,
            session,
            catalog,
            system,
            history,
            max_steps,
            ..
        } = turn;

        let tool_loop =
            ToolLoop::new(client, catalog, system, history, max_steps, new_message_id());

        tokio::spawn(
            async move {
                let outcome = tokio::select! {
                    biased;

                    _ = tx.closed() => Err(PgChatError::Aborted),
                    _ = cancel.cancelled() => {
                        tracing::info!("Shutting down, aborting turn");
                        Err(PgChatError::Aborted)
                    }
                    result = tokio::time::timeout(max_duration, tool_loop.run(&tx)) => {
                        result.unwrap_or(Err(PgChatError::Timeout(max_secs)))
                    }
                };

                close_session(session.as_ref()).await;

                match outcome {
                    Ok(_) => {}
                    Err(PgChatError::Aborted) => {
                        tracing::info!("Chat turn aborted");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Chat turn failed");
                        let _ = tx.send(Err(e)).await;
                    }
                }
            }
            .in_current_span(),
        );

        rx
    }
}

/// Closes a tool session that is dropped before the turn takes it over.
struct SessionGuard {
    session: Arc<dyn ToolSession>,
    armed: bool,
}

impl SessionGuard {
    fn new(session: Arc<dyn ToolSession>) -> Self {
        Self {
            session,
            armed: true,
        }
    }

    fn session(&self) -> &dyn ToolSession {
        self.session.as_ref()
    }

    /// Hands the session over; the caller becomes responsible for closing it.
    fn release(mut self) -> Arc<dyn ToolSession> {
        self.armed = false;
        Arc::clone(&self.session)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let session = Arc::clone(&self.session);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::info!("Request dropped during setup, closing tool session");
                handle.spawn(
                    async move { close_session(session.as_ref()).await }.in_current_span(),
                );
            }
            Err(_) => tracing::warn!("No runtime to close an abandoned tool session"),
        }
    }
}

/// Rejects URLs the query tool cannot connect with.
fn validate_db_url(raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| PgChatError::setup(format!("Invalid database URL: {e}")))?;
    if !POSTGRES_SCHEMES.contains(&parsed.scheme()) {
        return Err(PgChatError::setup(format!(
            "Unsupported database URL scheme '{}', expected postgres:// or postgresql://",
            parsed.scheme()
        )));
    }
    Ok(())
}

/// Closes a tool session, logging instead of failing.
async fn close_session(session: &dyn ToolSession) {
    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "Failed to close tool session");
    }
}

/// Parts reporting a failure after streaming started.
fn failure_parts(error: &PgChatError) -> Vec<StreamPart> {
    let details = db_error_from(error);
    let text = stream_failure_text(&details.message);
    vec![
        StreamPart::Data(vec![json!({ "dbError": details })]),
        StreamPart::Error(text),
    ]
}
