//! MCP client over a child process's stdio.
//!
//! Messages are newline-delimited JSON-RPC 2.0. Requests are serialized by a
//! mutex around the connection and responses are matched by id; server
//! notifications and log noise on stdout are skipped.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::McpConfig;
use crate::error::{PgChatError, Result};
use crate::llm::ToolDefinition;

use super::{CallToolResult, ToolConnector, ToolFailure, ToolSession};

/// MCP protocol revision sent in `initialize`.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Time the server gets to exit after stdin is closed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Launches one tool server subprocess per connection.
#[derive(Debug, Clone)]
pub struct StdioToolConnector {
    command: String,
    args: Vec<String>,
    handshake_timeout: Duration,
    call_timeout: Duration,
}

impl StdioToolConnector {
    /// Creates a connector for `command args... <db_url>`.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            handshake_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(60),
        }
    }

    /// Builds a connector from the `[mcp]` configuration section.
    pub fn from_config(config: &McpConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone()).with_timeouts(
            Duration::from_secs(config.handshake_timeout_secs),
            Duration::from_secs(config.call_timeout_secs),
        )
    }

    /// Sets the handshake and per-call timeouts.
    pub fn with_timeouts(mut self, handshake: Duration, call: Duration) -> Self {
        self.handshake_timeout = handshake;
        self.call_timeout = call;
        self
    }
}

#[async_trait]
impl ToolConnector for StdioToolConnector {
    async fn connect(&self, db_url: &str) -> Result<Arc<dyn ToolSession>> {
        let session = StdioToolSession::spawn(
            &self.command,
            &self.args,
            db_url,
            self.handshake_timeout,
            self.call_timeout,
        )
        .await?;
        Ok(Arc::new(session))
    }
}

/// Why a JSON-RPC request did not produce a result.
#[derive(Debug)]
enum RpcError {
    Transport(String),
    Remote { code: i64, message: String },
    Timeout(Duration),
    Closed,
}

impl RpcError {
    fn into_failure(self) -> ToolFailure {
        match self {
            Self::Remote { code, message } => {
                ToolFailure::new(format!("MCP error {}: {}", code, message))
                    .caused_by(ToolFailure::new(message))
            }
            other => ToolFailure::new(other.to_string()),
        }
    }

    fn into_error(self) -> PgChatError {
        PgChatError::mcp(self.to_string())
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "{}", message),
            Self::Remote { code, message } => write!(f, "MCP error {}: {}", code, message),
            Self::Timeout(after) => write!(f, "MCP server did not respond within {:?}", after),
            Self::Closed => write!(f, "MCP session is closed"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<ToolDefinition>,
}

struct Connection {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Connection {
    async fn write_message(&mut self, message: &Value) -> std::result::Result<(), RpcError> {
        let line = format!("{}\n", message);
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to write to MCP server: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to write to MCP server: {}", e)))
    }

    async fn read_response(&mut self, id: u64) -> std::result::Result<Value, RpcError> {
        loop {
            let mut line = String::new();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| RpcError::Transport(format!("Failed to read from MCP server: {}", e)))?;
            if read == 0 {
                return Err(RpcError::Transport(
                    "MCP server closed the connection".to_string(),
                ));
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let response: RpcResponse = match serde_json::from_str(line) {
                Ok(response) => response,
                Err(_) => {
                    tracing::debug!(line, "Skipping non-JSON output from MCP server");
                    continue;
                }
            };

            if response.id.as_ref().and_then(Value::as_u64) != Some(id) {
                // Notification or a late response to an abandoned request
                continue;
            }

            if let Some(error) = response.error {
                return Err(RpcError::Remote {
                    code: error.code,
                    message: error.message,
                });
            }
            return Ok(response.result.unwrap_or(Value::Null));
        }
    }
}

/// A live tool server subprocess.
pub struct StdioToolSession {
    connection: Mutex<Option<Connection>>,
    next_id: AtomicU64,
    call_timeout: Duration,
}

impl StdioToolSession {
    /// Spawns the server and performs the `initialize` handshake.
    pub async fn spawn(
        command: &str,
        args: &[String],
        db_url: &str,
        handshake_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self> {
        tracing::debug!(command, args = ?args, "Launching MCP server");

        let mut child = Command::new(command)
            .args(args)
            .arg(db_url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PgChatError::mcp(format!("Failed to launch MCP server '{}': {}", command, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PgChatError::mcp("Failed to open MCP server stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PgChatError::mcp("Failed to open MCP server stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "pg_chat::mcp::server", "{}", line);
                }
            });
        }

        let session = Self {
            connection: Mutex::new(Some(Connection {
                child,
                stdin,
                stdout: BufReader::new(stdout),
            })),
            next_id: AtomicU64::new(1),
            call_timeout,
        };

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "pg-chat", "version": env!("CARGO_PKG_VERSION") }
        });

        let handshake = async {
            let init = session.request("initialize", params, handshake_timeout).await?;
            tracing::debug!(
                server = %init.get("serverInfo").cloned().unwrap_or(serde_json::Value::Null),
                "MCP server initialized"
            );
            session.notify("notifications/initialized").await
        };

        if let Err(e) = handshake.await {
            let _ = session.close().await;
            return Err(PgChatError::mcp(format!(
                "MCP server handshake failed: {}",
                e
            )));
        }

        Ok(session)
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        limit: Duration,
    ) -> std::result::Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(RpcError::Closed)?;

        let exchange = async {
            connection.write_message(&message).await?;
            connection.read_response(id).await
        };

        match timeout(limit, exchange).await {
            Ok(result) => result,
            Err(_) => Err(RpcError::Timeout(limit)),
        }
    }

    async fn notify(&self, method: &str) -> std::result::Result<(), RpcError> {
        let message = json!({ "jsonrpc": "2.0", "method": method });
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(RpcError::Closed)?;
        connection.write_message(&message).await
    }
}

#[async_trait]
impl ToolSession for StdioToolSession {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        let result = self
            .request("tools/list", json!({}), self.call_timeout)
            .await
            .map_err(RpcError::into_error)?;

        let listing: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| PgChatError::mcp(format!("Invalid tools/list result: {}", e)))?;

        tracing::debug!(
            tools = ?listing.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "Listed MCP tools"
        );
        Ok(listing.tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: &Value,
    ) -> std::result::Result<CallToolResult, ToolFailure> {
        let result = self
            .request(
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
                self.call_timeout,
            )
            .await
            .map_err(RpcError::into_failure)?;

        serde_json::from_value(result)
            .map_err(|e| ToolFailure::new(format!("Invalid tools/call result: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        let Some(connection) = self.connection.lock().await.take() else {
            return Ok(());
        };

        let Connection {
            mut child, stdin, ..
        } = connection;
        drop(stdin);

        match timeout(SHUTDOWN_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(%status, "MCP server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(PgChatError::mcp(format!(
                "Failed to wait for MCP server: {}",
                e
            ))),
            Err(_) => {
                tracing::debug!("MCP server did not exit, killing it");
                child
                    .kill()
                    .await
                    .map_err(|e| PgChatError::mcp(format!("Failed to kill MCP server: {}", e)))
            }
        }
    }
}
