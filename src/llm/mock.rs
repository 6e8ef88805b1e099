//! Mock LLM client for testing.
//!
//! Plays back a script of steps, one per `stream_step` call, and records every
//! request it receives. Once the script is exhausted it answers with a short
//! completion text so loops always terminate.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::{PgChatError, Result};
use crate::llm::factory::LlmClientFactory;
use crate::llm::types::{ModelEvent, StepRequest, ToolCall};
use crate::llm::LlmClient;
use crate::protocol::FinishReason;

/// Reply used once the script is exhausted.
const DEFAULT_REPLY: &str = "✅";

/// One scripted model step.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Stream these events.
    Events(Vec<ModelEvent>),
    /// Fail before the stream starts.
    Fail(String),
    /// Stream these events, then fail.
    FailMidStream(Vec<ModelEvent>, String),
    /// Never produce an event.
    Hang,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<MockStep>,
    requests: Vec<StepRequest>,
    api_keys: Vec<String>,
    call_counter: usize,
}

/// Mock LLM client that plays back scripted steps.
///
/// Clones share the script and the request log.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    state: Arc<Mutex<MockState>>,
}

impl MockLlmClient {
    /// Creates a new mock client with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a raw step.
    pub fn with_step(self, step: MockStep) -> Self {
        self.lock().script.push_back(step);
        self
    }

    /// Appends a step that streams `text` and stops.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with_step(MockStep::Events(vec![
            ModelEvent::TextDelta(text.into()),
            ModelEvent::Finish(FinishReason::Stop),
        ]))
    }

    /// Appends a step that calls `tool_name` with `args`.
    pub fn with_tool_call(self, tool_name: impl Into<String>, args: Value) -> Self {
        self.with_tool_calls(vec![(tool_name.into(), args)])
    }

    /// Appends a step that issues several tool calls at once.
    pub fn with_tool_calls(self, calls: Vec<(String, Value)>) -> Self {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            for (name, args) in calls {
                state.call_counter += 1;
                let id = format!("call_{}", state.call_counter);
                events.push(ModelEvent::ToolCallStarted {
                    id: id.clone(),
                    name: name.clone(),
                });
                events.push(ModelEvent::ToolCall(ToolCall::new(id, name, args)));
            }
        }
        events.push(ModelEvent::Finish(FinishReason::ToolCalls));
        self.with_step(MockStep::Events(events))
    }

    /// Appends a step that fails before streaming.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.with_step(MockStep::Fail(message.into()))
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<StepRequest> {
        self.lock().requests.clone()
    }

    /// Returns the API keys clients were created with.
    pub fn api_keys(&self) -> Vec<String> {
        self.lock().api_keys.clone()
    }

    /// Returns the number of steps not yet played.
    pub fn remaining_steps(&self) -> usize {
        self.lock().script.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        // A poisoned lock only means another test thread panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn stream_step(
        &self,
        request: &StepRequest,
    ) -> Result<BoxStream<'static, Result<ModelEvent>>> {
        let step = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            state.script.pop_front()
        };

        let step = step.unwrap_or_else(|| {
            MockStep::Events(vec![
                ModelEvent::TextDelta(DEFAULT_REPLY.to_string()),
                ModelEvent::Finish(FinishReason::Stop),
            ])
        });

        match step {
            MockStep::Events(events) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
            MockStep::Fail(message) => Err(PgChatError::llm(message)),
            MockStep::FailMidStream(events, message) => Ok(stream::iter(
                events
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(PgChatError::llm(message)))),
            )
            .boxed()),
            MockStep::Hang => Ok(stream::pending().boxed()),
        }
    }
}

impl LlmClientFactory for MockLlmClient {
    fn create(&self, api_key: &str) -> Result<Arc<dyn LlmClient>> {
        self.lock().api_keys.push(api_key.to_string());
        Ok(Arc::new(self.clone()))
    }
}
