//! Error types for pg-chat.
//!
//! Defines the main error enum used throughout the application.

use thiserror::Error;

/// Main error type for pg-chat operations.
#[derive(Error, Debug, Clone)]
pub enum PgChatError {
    /// Configuration errors (invalid config file, unusable settings, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request setup errors (malformed body, missing API key or database URL, etc.)
    #[error("Setup error: {0}")]
    Setup(String),

    /// MCP tool-server errors (spawn failure, handshake, protocol violations)
    #[error("MCP error: {0}")]
    Mcp(String),

    /// LLM API errors (rate limits, auth, provider error bodies, etc.)
    #[error("LLM error: {0}")]
    Llm(String),

    /// Transport failures while a response is being streamed.
    #[error("Stream error: {0}")]
    Stream(String),

    /// A model step failed while a tool round-trip was in progress.
    #[error("Tool call '{tool_name}' failed: {message}")]
    ToolCall {
        tool_name: String,
        sql: Option<String>,
        message: String,
    },

    /// The request exceeded its maximum duration.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The client went away or the server is shutting down.
    #[error("Request aborted")]
    Aborted,

    /// Chat session state violations (request in flight, nothing to fix, etc.)
    #[error("Session error: {0}")]
    Session(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PgChatError {
    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a setup error with the given message.
    pub fn setup(msg: impl Into<String>) -> Self {
        Self::Setup(msg.into())
    }

    /// Creates an MCP error with the given message.
    pub fn mcp(msg: impl Into<String>) -> Self {
        Self::Mcp(msg.into())
    }

    /// Creates an LLM error with the given message.
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    /// Creates a stream error with the given message.
    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    /// Creates a session error with the given message.
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "Configuration Error",
            Self::Setup(_) => "Setup Error",
            Self::Mcp(_) => "MCP Error",
            Self::Llm(_) => "LLM Error",
            Self::Stream(_) => "Stream Error",
            Self::ToolCall { .. } => "Tool Error",
            Self::Timeout(_) => "Timeout",
            Self::Aborted => "Aborted",
            Self::Session(_) => "Session Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the bare message without the category prefix.
    ///
    /// This is what ends up in user-facing error bubbles.
    pub fn message(&self) -> String {
        match self {
            Self::Config(m)
            | Self::Setup(m)
            | Self::Mcp(m)
            | Self::Llm(m)
            | Self::Stream(m)
            | Self::Session(m)
            | Self::Internal(m) => m.clone(),
            Self::ToolCall { message, .. } => message.clone(),
            Self::Timeout(_) | Self::Aborted => self.to_string(),
        }
    }

    /// Returns true for errors that happen before any tool session is usable.
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Setup(_) | Self::Mcp(_))
    }
}

/// Result type alias using PgChatError.
pub type Result<T> = std::result::Result<T, PgChatError>;
