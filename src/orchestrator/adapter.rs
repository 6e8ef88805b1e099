//! Tool adapter between the model loop and the tool session.
//!
//! Every handler is wrapped in [`DbErrorGuard`] when it is registered, so a
//! failing query never escapes the turn: the model receives a structured
//! database error as the tool result and can react to it.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::llm::{ToolCall, ToolDefinition};
use crate::mcp::{CallToolResult, ToolFailure, ToolSession};

use super::prompt::UNKNOWN_DB_ERROR;

/// Executes one tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: &Value) -> std::result::Result<CallToolResult, ToolFailure>;
}

/// Forwards calls to a named tool of a live session.
pub struct SessionToolHandler {
    session: Arc<dyn ToolSession>,
    name: String,
}

impl SessionToolHandler {
    pub fn new(session: Arc<dyn ToolSession>, name: impl Into<String>) -> Self {
        Self {
            session,
            name: name.into(),
        }
    }
}

#[async_trait]
impl ToolHandler for SessionToolHandler {
    async fn call(&self, args: &Value) -> std::result::Result<CallToolResult, ToolFailure> {
        self.session.call_tool(&self.name, args).await
    }
}

/// Payload of a database error tool result. Field order is part of the format.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DatabaseErrorPayload<'a> {
    error: bool,
    error_type: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sql: Option<&'a str>,
}

/// Builds the tool result reported for a failed database call.
pub fn database_error_result(message: &str, sql: Option<&str>) -> CallToolResult {
    let payload = DatabaseErrorPayload {
        error: true,
        error_type: "database",
        message,
        sql,
    };
    let text = serde_json::to_string(&payload).unwrap_or_else(|_| {
        format!("{{\"error\":true,\"errorType\":\"database\",\"message\":{message:?}}}")
    });
    CallToolResult::text(text, true)
}

/// Decorator that turns every failure of the wrapped handler into a result.
pub struct DbErrorGuard<H> {
    inner: H,
    tool_name: String,
}

impl<H: ToolHandler> DbErrorGuard<H> {
    pub fn new(tool_name: impl Into<String>, inner: H) -> Self {
        Self {
            inner,
            tool_name: tool_name.into(),
        }
    }

    /// Runs the handler; never fails.
    pub async fn run(&self, args: &Value) -> CallToolResult {
        match self.inner.call(args).await {
            Ok(result) => result,
            Err(failure) => {
                let message = failure.root_message().unwrap_or(UNKNOWN_DB_ERROR);
                let sql = args.get("sql").and_then(Value::as_str);
                tracing::error!(
                    tool = %self.tool_name,
                    sql = sql.unwrap_or(""),
                    "SQL Error: {}",
                    message
                );
                database_error_result(message, sql)
            }
        }
    }
}

#[async_trait]
impl<H: ToolHandler> ToolHandler for DbErrorGuard<H> {
    async fn call(&self, args: &Value) -> std::result::Result<CallToolResult, ToolFailure> {
        Ok(self.run(args).await)
    }
}

/// The tools offered to the model for one request.
///
/// Handlers can only be registered through [`ToolCatalog::register`], which
/// applies [`DbErrorGuard`].
#[derive(Default)]
pub struct ToolCatalog {
    definitions: Vec<ToolDefinition>,
    handlers: HashMap<String, DbErrorGuard<Box<dyn ToolHandler>>>,
}

#[async_trait]
impl ToolHandler for Box<dyn ToolHandler> {
    async fn call(&self, args: &Value) -> std::result::Result<CallToolResult, ToolFailure> {
        (**self).call(args).await
    }
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every listed tool against a live session.
    pub fn for_session(session: Arc<dyn ToolSession>, definitions: Vec<ToolDefinition>) -> Self {
        let mut catalog = Self::new();
        for definition in definitions {
            let handler = SessionToolHandler::new(Arc::clone(&session), definition.name.clone());
            catalog.register(definition, Box::new(handler));
        }
        catalog
    }

    /// Registers a handler, wrapping it in the error guard.
    pub fn register(&mut self, definition: ToolDefinition, handler: Box<dyn ToolHandler>) {
        let guard = DbErrorGuard::new(definition.name.clone(), handler);
        self.handlers.insert(definition.name.clone(), guard);
        self.definitions.retain(|d| d.name != definition.name);
        self.definitions.push(definition);
    }

    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    /// Executes a model tool call. Unknown tools get a database error result.
    pub async fn execute(&self, call: &ToolCall) -> CallToolResult {
        match self.handlers.get(&call.name) {
            Some(handler) => handler.run(&call.arguments).await,
            None => {
                tracing::warn!(tool = %call.name, "Model called an unknown tool");
                database_error_result(
                    &format!("Tool '{}' is not available", call.name),
                    call.arguments.get("sql").and_then(Value::as_str),
                )
            }
        }
    }
}
