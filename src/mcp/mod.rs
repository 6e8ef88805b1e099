//! MCP tool-server integration.
//!
//! A tool session is a Model Context Protocol server speaking JSON-RPC 2.0.
//! The default deployment launches `@modelcontextprotocol/server-postgres` as a
//! subprocess per chat request ([`stdio`]); tests use [`mock`].

pub mod mock;
pub mod stdio;

pub use mock::MockToolConnector;
pub use stdio::{StdioToolConnector, StdioToolSession};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::llm::ToolDefinition;

/// One content item of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
}

/// Result of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Creates a result with a single text item.
    pub fn text(text: impl Into<String>, is_error: bool) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error,
        }
    }

    /// Returns the text items joined by newlines.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ToolContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Returns the result as a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A failure raised while executing a tool.
///
/// Failures may wrap a cause; the innermost cause usually carries the
/// database's own message (`relation "x" does not exist`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub message: String,
    pub cause: Option<Box<ToolFailure>>,
}

impl ToolFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// Wraps `cause` as the reason for this failure.
    pub fn caused_by(mut self, cause: ToolFailure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Returns the most specific non-empty message in the cause chain.
    pub fn root_message(&self) -> Option<&str> {
        let nested = self.cause.as_deref().and_then(ToolFailure::root_message);
        nested.or_else(|| {
            let own = self.message.trim();
            (!own.is_empty()).then_some(self.message.as_str())
        })
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for ToolFailure {}

/// An open tool session, scoped to one chat request.
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Lists the tools the server offers.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Calls a tool.
    async fn call_tool(
        &self,
        name: &str,
        arguments: &Value,
    ) -> std::result::Result<CallToolResult, ToolFailure>;

    /// Shuts the session down. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Opens tool sessions against a database.
#[async_trait]
pub trait ToolConnector: Send + Sync {
    async fn connect(&self, db_url: &str) -> Result<Arc<dyn ToolSession>>;
}
