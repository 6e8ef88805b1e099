//! Bounded model/tool loop for one chat turn.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! AwaitingModel ──(tool calls)──▶ AwaitingTool ──▶ AwaitingModel ...
//!       │                                               │
//!       └──(text only / step ceiling)──▶ Done ◀─────────┘
//! any send to a departed client ──▶ Aborted
//! ```
//!
//! Each model step streams its events to the client as they arrive. Tool calls
//! of a step run sequentially, and each result is streamed and appended to the
//! history before the step is closed and the next model step starts.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::error::{PgChatError, Result};
use crate::llm::{
    ContentPart, LlmClient, Message, ModelEvent, Role, StepRequest, ToolCall, ToolResult,
};
use crate::protocol::{FinishReason, StreamPart};

use super::adapter::ToolCatalog;

/// Channel carrying stream parts (or the terminal failure) to the response body.
pub type PartSender = mpsc::Sender<Result<StreamPart>>;

#[derive(Debug)]
enum LoopState {
    AwaitingModel,
    AwaitingTool(Vec<ToolCall>),
    Done(FinishReason),
    Aborted,
}

/// What a single model step produced.
struct StepOutcome {
    calls: Vec<ToolCall>,
    finish_reason: FinishReason,
}

/// The most recent tool round-trip, used to attribute later failures.
#[derive(Debug, Clone)]
struct LastToolCall {
    name: String,
    sql: Option<String>,
}

/// Client disconnected while a part was being sent.
struct Disconnected;

/// Runs one chat turn against a model and a tool catalog.
pub struct ToolLoop {
    client: Arc<dyn LlmClient>,
    catalog: ToolCatalog,
    system: String,
    history: Vec<Message>,
    max_steps: usize,
    message_id: String,
    step_started: bool,
    last_tool: Option<LastToolCall>,
}

impl ToolLoop {
    pub fn new(
        client: Arc<dyn LlmClient>,
        catalog: ToolCatalog,
        system: String,
        history: Vec<Message>,
        max_steps: usize,
        message_id: String,
    ) -> Self {
        Self {
            client,
            catalog,
            system,
            history,
            max_steps: max_steps.max(1),
            message_id,
            step_started: false,
            last_tool: None,
        }
    }

    /// Drives the turn to completion, streaming parts into `tx`.
    ///
    /// Returns the final finish reason. Model failures are returned as errors
    /// without being sent; the caller decides how to report them.
    pub async fn run(mut self, tx: &PartSender) -> Result<FinishReason> {
        let started = Instant::now();
        let mut step = 0usize;
        let mut state = LoopState::AwaitingModel;

        loop {
            state = match state {
                LoopState::AwaitingModel => {
                    if step >= self.max_steps {
                        tracing::warn!(max_steps = self.max_steps, "Step ceiling reached");
                        LoopState::Done(FinishReason::ToolCalls)
                    } else {
                        step += 1;
                        tracing::debug!(step, max_steps = self.max_steps, "Starting model step");
                        match self.model_step(tx).await? {
                            Ok(outcome) if outcome.calls.is_empty() => {
                                LoopState::Done(outcome.finish_reason)
                            }
                            Ok(outcome) => LoopState::AwaitingTool(outcome.calls),
                            Err(Disconnected) => LoopState::Aborted,
                        }
                    }
                }
                LoopState::AwaitingTool(calls) => match self.run_tools(calls, tx).await {
                    Ok(()) => LoopState::AwaitingModel,
                    Err(Disconnected) => LoopState::Aborted,
                },
                LoopState::Done(finish_reason) => {
                    // Ignore a departed client here: the turn is complete either way
                    let _ = self.emit(tx, StreamPart::FinishMessage { finish_reason }).await;
                    tracing::info!(
                        steps = step,
                        finish_reason = ?finish_reason,
                        duration_ms = started.elapsed().as_millis(),
                        "Chat turn complete"
                    );
                    return Ok(finish_reason);
                }
                LoopState::Aborted => {
                    tracing::info!(steps = step, "Client disconnected, aborting turn");
                    return Err(PgChatError::Aborted);
                }
            };
        }
    }

    /// Runs one model step.
    ///
    /// The outer `Result` carries model failures; the inner one a client
    /// disconnect.
    async fn model_step(
        &mut self,
        tx: &PartSender,
    ) -> Result<std::result::Result<StepOutcome, Disconnected>> {
        self.step_started = false;

        let request = StepRequest {
            system: self.system.clone(),
            messages: self.history.clone(),
            tools: self.catalog.definitions().to_vec(),
        };

        let mut events = self
            .client
            .stream_step(&request)
            .await
            .map_err(|e| self.attribute(e))?;

        let mut parts: Vec<ContentPart> = Vec::new();
        let mut calls = Vec::new();
        let mut finish_reason = FinishReason::Unknown;

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| self.attribute(e))?;
            let part = match event {
                ModelEvent::TextDelta(text) => {
                    match parts.last_mut() {
                        Some(ContentPart::Text(existing)) => existing.push_str(&text),
                        _ => parts.push(ContentPart::Text(text.clone())),
                    }
                    Some(StreamPart::Text(text))
                }
                ModelEvent::ToolCallStarted { id, name } => Some(StreamPart::ToolCallStart {
                    tool_call_id: id,
                    tool_name: name,
                }),
                ModelEvent::ToolCall(call) => {
                    let part = StreamPart::ToolCall {
                        tool_call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        args: call.arguments.clone(),
                    };
                    parts.push(ContentPart::ToolCall(call.clone()));
                    calls.push(call);
                    Some(part)
                }
                ModelEvent::Finish(reason) => {
                    finish_reason = reason;
                    None
                }
            };

            if let Some(part) = part {
                if self.emit(tx, part).await.is_err() {
                    return Ok(Err(Disconnected));
                }
            }
        }

        if !calls.is_empty() {
            finish_reason = FinishReason::ToolCalls;
        }

        if !parts.is_empty() {
            self.history.push(Message::new(Role::Assistant, parts));
        }

        // A step with tool calls is closed once its results are in
        if calls.is_empty() && self.finish_step(tx, finish_reason).await.is_err() {
            return Ok(Err(Disconnected));
        }

        tracing::debug!(
            tool_calls = calls.len(),
            finish_reason = ?finish_reason,
            "Model step finished"
        );

        Ok(Ok(StepOutcome {
            calls,
            finish_reason,
        }))
    }

    /// Executes the calls of one step in order.
    async fn run_tools(
        &mut self,
        calls: Vec<ToolCall>,
        tx: &PartSender,
    ) -> std::result::Result<(), Disconnected> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            let started = Instant::now();
            let result = self.catalog.execute(&call).await;
            tracing::debug!(
                tool = %call.name,
                is_error = result.is_error,
                duration_ms = started.elapsed().as_millis(),
                "Tool call finished"
            );

            let value = result.to_value();
            self.last_tool = Some(LastToolCall {
                name: call.name.clone(),
                sql: call
                    .arguments
                    .get("sql")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
            });

            self.emit(
                tx,
                StreamPart::ToolResult {
                    tool_call_id: call.id.clone(),
                    result: value.clone(),
                },
            )
            .await?;

            results.push(ToolResult {
                tool_call_id: call.id,
                tool_name: call.name,
                content: value,
            });
        }

        self.history.push(Message::tool_results(results));
        self.finish_step(tx, FinishReason::ToolCalls).await
    }

    async fn finish_step(
        &mut self,
        tx: &PartSender,
        finish_reason: FinishReason,
    ) -> std::result::Result<(), Disconnected> {
        let finish = StreamPart::FinishStep {
            finish_reason,
            is_continued: false,
        };
        self.emit(tx, finish).await
    }

    /// Sends a part, opening the step with a start marker first.
    async fn emit(
        &mut self,
        tx: &PartSender,
        part: StreamPart,
    ) -> std::result::Result<(), Disconnected> {
        if !self.step_started && !matches!(part, StreamPart::FinishMessage { .. }) {
            self.step_started = true;
            let start = StreamPart::StartStep {
                message_id: self.message_id.clone(),
            };
            tx.send(Ok(start)).await.map_err(|_| Disconnected)?;
        }
        tx.send(Ok(part)).await.map_err(|_| Disconnected)
    }

    /// Attaches the last tool round-trip to a model failure, if there was one.
    fn attribute(&self, error: PgChatError) -> PgChatError {
        match (&self.last_tool, &error) {
            (_, PgChatError::Aborted | PgChatError::Timeout(_) | PgChatError::ToolCall { .. }) => {
                error
            }
            (Some(last), _) => PgChatError::ToolCall {
                tool_name: last.name.clone(),
                sql: last.sql.clone(),
                message: error.message(),
            },
            (None, _) => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, MockStep, ToolDefinition};
    use crate::mcp::{CallToolResult, ToolFailure};
    use crate::orchestrator::adapter::ToolHandler;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    struct Rows;

    #[async_trait]
    impl ToolHandler for Rows {
        async fn call(&self, args: &Value) -> std::result::Result<CallToolResult, ToolFailure> {
            if args["sql"].as_str().unwrap_or("").contains("missing") {
                return Err(ToolFailure::new("wrapped")
                    .caused_by(ToolFailure::new("relation \"missing\" does not exist")));
            }
            Ok(CallToolResult::text("[{\"n\":1}]", false))
        }
    }

    fn catalog() -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        catalog.register(
            ToolDefinition {
                name: "query".to_string(),
                description: "Run SQL".to_string(),
                parameters: json!({ "type": "object" }),
            },
            Box::new(Rows),
        );
        catalog
    }

    fn tool_loop(mock: &MockLlmClient, max_steps: usize) -> ToolLoop {
        ToolLoop::new(
            Arc::new(mock.clone()),
            catalog(),
            "system".to_string(),
            vec![Message::user("How many users?")],
            max_steps,
            "msg-test".to_string(),
        )
    }

    async fn run(mock: &MockLlmClient, max_steps: usize) -> (Result<FinishReason>, Vec<StreamPart>) {
        let (tx, mut rx) = mpsc::channel(256);
        let result = tool_loop(mock, max_steps).run(&tx).await;
        drop(tx);
        let mut parts = Vec::new();
        while let Some(part) = rx.recv().await {
            parts.push(part.unwrap());
        }
        (result, parts)
    }

    fn codes(parts: &[StreamPart]) -> String {
        parts.iter().map(StreamPart::code).collect()
    }

    #[tokio::test]
    async fn test_text_only_turn() {
        let mock = MockLlmClient::new().with_text("Hello ✅");

        let (result, parts) = run(&mock, 10).await;

        assert_eq!(result.unwrap(), FinishReason::Stop);
        assert_eq!(codes(&parts), "f0ed");
    }

    #[tokio::test]
    async fn test_two_tool_calls_then_text() {
        let mock = MockLlmClient::new()
            .with_tool_call("query", json!({ "sql": "SELECT table_name FROM information_schema.tables" }))
            .with_tool_call("query", json!({ "sql": "SELECT count(*) FROM \"Users\"" }))
            .with_text("There are 3 users ✅");

        let (result, parts) = run(&mock, 10).await;

        assert_eq!(result.unwrap(), FinishReason::Stop);
        assert_eq!(codes(&parts), "fb9aefb9aef0ed");

        let requests = mock.requests();
        assert_eq!(requests.len(), 3);
        let roles: Vec<Role> = requests[2].messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant, Role::Tool]
        );
        assert_eq!(requests[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn test_failing_tool_is_reported_as_result() {
        let mock = MockLlmClient::new()
            .with_tool_call("query", json!({ "sql": "SELECT * FROM missing" }))
            .with_text("That table does not exist ✅");

        let (result, parts) = run(&mock, 10).await;

        assert!(result.is_ok());
        let tool_result = parts
            .iter()
            .find_map(|p| match p {
                StreamPart::ToolResult { result, .. } => Some(result.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(tool_result["isError"], true);
        assert!(tool_result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("relation \\\"missing\\\" does not exist"));
    }

    #[tokio::test]
    async fn test_step_ceiling_finishes_with_tool_calls() {
        let mut mock = MockLlmClient::new();
        for _ in 0..5 {
            mock = mock.with_tool_call("query", json!({ "sql": "SELECT 1" }));
        }

        let (result, parts) = run(&mock, 3).await;

        assert_eq!(result.unwrap(), FinishReason::ToolCalls);
        assert_eq!(mock.requests().len(), 3);
        assert_eq!(
            parts.last(),
            Some(&StreamPart::FinishMessage {
                finish_reason: FinishReason::ToolCalls
            })
        );
    }

    #[tokio::test]
    async fn test_failure_before_first_event_sends_nothing() {
        let mock = MockLlmClient::new().with_failure("Rate limited. Please wait and try again.");

        let (result, parts) = run(&mock, 10).await;

        assert!(matches!(result, Err(PgChatError::Llm(_))));
        assert!(parts.is_empty());
    }

    #[tokio::test]
    async fn test_failure_after_tool_is_attributed() {
        let mock = MockLlmClient::new()
            .with_tool_call("query", json!({ "sql": "SELECT 1" }))
            .with_step(MockStep::FailMidStream(
                vec![ModelEvent::TextDelta("partial".to_string())],
                "connection reset".to_string(),
            ));

        let (result, parts) = run(&mock, 10).await;

        match result {
            Err(PgChatError::ToolCall {
                tool_name,
                sql,
                message,
            }) => {
                assert_eq!(tool_name, "query");
                assert_eq!(sql.as_deref(), Some("SELECT 1"));
                assert_eq!(message, "connection reset");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(parts.last(), Some(&StreamPart::Text("partial".to_string())));
    }

    #[tokio::test]
    async fn test_closed_receiver_aborts() {
        let mock = MockLlmClient::new()
            .with_tool_call("query", json!({ "sql": "SELECT 1" }))
            .with_text("never sent");
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = tool_loop(&mock, 10).run(&tx).await;

        assert!(matches!(result, Err(PgChatError::Aborted)));
        assert_eq!(mock.requests().len(), 1);
    }
}
