//! In-process tool connector for tests and offline demos.
//!
//! Serves a single `query` tool. Queries matching a configured pattern fail
//! with a database-style error; everything else returns canned rows. Every
//! connect, call and close is recorded.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{PgChatError, Result};
use crate::llm::ToolDefinition;

use super::{CallToolResult, ToolConnector, ToolFailure, ToolSession};

#[derive(Debug, Default)]
struct MockToolState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    calls: Mutex<Vec<(String, Value)>>,
    db_urls: Mutex<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
struct MockToolBehavior {
    fail_connect: Option<String>,
    fail_list: Option<String>,
    list_delay: Option<Duration>,
    failures: Vec<(String, ToolFailure)>,
    rows: Option<Value>,
}

/// Tool connector whose sessions run entirely in memory.
///
/// Clones share the recorded state.
#[derive(Debug, Clone, Default)]
pub struct MockToolConnector {
    state: Arc<MockToolState>,
    behavior: MockToolBehavior,
}

impl MockToolConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `connect` fail with `message`.
    pub fn with_connect_failure(mut self, message: impl Into<String>) -> Self {
        self.behavior.fail_connect = Some(message.into());
        self
    }

    /// Makes `list_tools` fail with `message`.
    pub fn with_list_failure(mut self, message: impl Into<String>) -> Self {
        self.behavior.fail_list = Some(message.into());
        self
    }

    /// Makes `list_tools` wait `delay` before answering.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.behavior.list_delay = Some(delay);
        self
    }

    /// Makes calls whose SQL contains `pattern` fail.
    ///
    /// The failure wraps the database message as its cause, the way a real
    /// MCP server reports query errors.
    pub fn with_query_failure(
        mut self,
        pattern: impl Into<String>,
        db_message: impl Into<String>,
    ) -> Self {
        let db_message = db_message.into();
        let failure = ToolFailure::new(format!("MCP error -32603: {}", db_message))
            .caused_by(ToolFailure::new(db_message));
        self.behavior.failures.push((pattern.into(), failure));
        self
    }

    /// Makes calls whose SQL contains `pattern` fail with `failure` as is.
    pub fn with_raw_failure(mut self, pattern: impl Into<String>, failure: ToolFailure) -> Self {
        self.behavior.failures.push((pattern.into(), failure));
        self
    }

    /// Sets the rows returned by successful queries.
    pub fn with_rows(mut self, rows: Value) -> Self {
        self.behavior.rows = Some(rows);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Returns every `(tool, arguments)` pair called so far.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state
            .calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Returns the database URLs sessions were opened with.
    pub fn db_urls(&self) -> Vec<String> {
        self.state
            .db_urls
            .lock()
            .map(|urls| urls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ToolConnector for MockToolConnector {
    async fn connect(&self, db_url: &str) -> Result<Arc<dyn ToolSession>> {
        if let Some(message) = &self.behavior.fail_connect {
            return Err(PgChatError::mcp(message.clone()));
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut urls) = self.state.db_urls.lock() {
            urls.push(db_url.to_string());
        }

        Ok(Arc::new(MockToolSession {
            state: Arc::clone(&self.state),
            behavior: self.behavior.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockToolSession {
    state: Arc<MockToolState>,
    behavior: MockToolBehavior,
    closed: AtomicBool,
}

#[async_trait]
impl ToolSession for MockToolSession {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        if let Some(delay) = self.behavior.list_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.behavior.fail_list {
            return Err(PgChatError::mcp(message.clone()));
        }

        Ok(vec![ToolDefinition {
            name: "query".to_string(),
            description: "Run a read-only SQL query".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "sql": { "type": "string" } }
            }),
        }])
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Value,
    ) -> std::result::Result<CallToolResult, ToolFailure> {
        if let Ok(mut calls) = self.state.calls.lock() {
            calls.push((name.to_string(), arguments.clone()));
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(ToolFailure::new("MCP session is closed"));
        }
        if name != "query" {
            return Err(ToolFailure::new(format!("Unknown tool: {}", name)));
        }

        let sql = arguments.get("sql").and_then(Value::as_str).unwrap_or("");
        if let Some((_, failure)) = self
            .behavior
            .failures
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Err(failure.clone());
        }

        let rows = self
            .behavior
            .rows
            .clone()
            .unwrap_or_else(|| json!([{ "?column?": 1 }]));
        Ok(CallToolResult::text(rows.to_string(), false))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
