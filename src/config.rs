//! Configuration management for pg-chat.
//!
//! Handles loading the operator configuration from a TOML file: where the
//! server listens, which LLM provider and model to use, how to launch the MCP
//! tool server, and the per-request limits of the tool loop.

use crate::error::{PgChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for pg-chat.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// LLM provider configuration.
    #[serde(default)]
    pub llm: LlmConfig,

    /// MCP tool server configuration.
    #[serde(default)]
    pub mcp: McpConfig,

    /// Per-request limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the chat API listens on.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// LLM provider configuration.
///
/// The API key is never part of this file; it arrives with every chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// LLM provider: "gemini", "openai" or "mock".
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model name (e.g., "gemini-2.5-flash", "gpt-4o").
    #[serde(default = "default_model")]
    pub model: String,

    /// Timeout for a single provider request in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "gemini".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_llm_timeout() -> u64 {
    90
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// MCP tool server configuration.
///
/// The database URL from the chat request is appended as the last argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Executable that starts the tool server.
    #[serde(default = "default_mcp_command")]
    pub command: String,

    /// Arguments passed before the database URL.
    #[serde(default = "default_mcp_args")]
    pub args: Vec<String>,

    /// Time allowed for spawn + initialize handshake, in seconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Time allowed for a single tool call, in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

fn default_mcp_command() -> String {
    "npx".to_string()
}

fn default_mcp_args() -> Vec<String> {
    vec![
        "-y".to_string(),
        "@modelcontextprotocol/server-postgres".to_string(),
    ]
}

fn default_handshake_timeout() -> u64 {
    60
}

fn default_call_timeout() -> u64 {
    60
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            command: default_mcp_command(),
            args: default_mcp_args(),
            handshake_timeout_secs: default_handshake_timeout(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

/// Limits applied to every chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum model steps in conversation mode.
    #[serde(default = "default_conversation_steps")]
    pub conversation_max_steps: usize,

    /// Maximum model steps in repair (AutoFix) mode.
    #[serde(default = "default_repair_steps")]
    pub repair_max_steps: usize,

    /// Hard ceiling on the duration of one request, in seconds.
    #[serde(default = "default_max_request_secs")]
    pub max_request_secs: u64,
}

fn default_conversation_steps() -> usize {
    200
}

fn default_repair_steps() -> usize {
    50
}

fn default_max_request_secs() -> u64 {
    120
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            conversation_max_steps: default_conversation_steps(),
            repair_max_steps: default_repair_steps(),
            max_request_secs: default_max_request_secs(),
        }
    }
}

impl LimitsConfig {
    /// Returns the request duration ceiling.
    pub fn max_request_duration(&self) -> Duration {
        Duration::from_secs(self.max_request_secs)
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pg-chat")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    ///
    /// A missing file yields the default configuration.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| PgChatError::config(format!("Failed to read config file: {e}")))?;

        let config = Self::parse_toml(&content, path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            PgChatError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Rejects values the tool loop cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.limits.conversation_max_steps == 0 || self.limits.repair_max_steps == 0 {
            return Err(PgChatError::config("Step limits must be at least 1"));
        }
        if self.limits.max_request_secs == 0 {
            return Err(PgChatError::config("max_request_secs must be at least 1"));
        }
        if self.mcp.command.trim().is_empty() {
            return Err(PgChatError::config("mcp.command must not be empty"));
        }
        Ok(())
    }
}
