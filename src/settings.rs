//! User settings store.
//!
//! Holds the values a user supplies before chatting: the LLM API key, the
//! PostgreSQL URL handed to the tool server, and optional custom instructions.
//! Settings are loaded once per session and passed explicitly with every chat
//! request. Nothing here has a default value: an absent key means the user has
//! not configured it yet.

use crate::error::{PgChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User-supplied settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// LLM provider API key.
    #[serde(rename = "gemini-key", default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// PostgreSQL connection URL.
    #[serde(
        rename = "postgres-db-url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub db_url: Option<String>,

    /// Free-text instructions appended to every system prompt.
    #[serde(
        rename = "custom-instructions",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_instructions: Option<String>,
}

impl Settings {
    /// Returns true when both the API key and the database URL are set.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.db_url.is_some()
    }

    /// Treats blank values as absent.
    fn normalized(self) -> Self {
        Self {
            api_key: non_blank(self.api_key),
            db_url: non_blank(self.db_url),
            custom_instructions: non_blank(self.custom_instructions),
        }
    }

    /// Returns a display-safe summary (API key and password redacted).
    pub fn display_summary(&self) -> String {
        let key = match &self.api_key {
            Some(key) => redact_key(key),
            None => "(not set)".to_string(),
        };
        let db = match &self.db_url {
            Some(url) => redact_url(url),
            None => "(not set)".to_string(),
        };
        let instructions = match &self.custom_instructions {
            Some(text) => format!("{} chars", text.chars().count()),
            None => "(none)".to_string(),
        };
        format!("API key: {key}\nDatabase: {db}\nCustom instructions: {instructions}")
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn redact_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{tail}")
}

/// Removes the password from a connection URL for display.
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("****"));
            }
            parsed.to_string()
        }
        Err(_) => "(unparseable URL)".to_string(),
    }
}

/// File-backed settings store.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Creates a store at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates a store at the platform default location.
    pub fn open_default() -> Self {
        Self::new(Self::default_path())
    }

    /// Returns the default settings file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pg-chat")
            .join("settings.toml")
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the settings. A missing file is the unconfigured state.
    pub fn load(&self) -> Result<Settings> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "No settings file, starting unconfigured");
            return Ok(Settings::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| PgChatError::config(format!("Failed to read settings: {e}")))?;

        let settings: Settings = toml::from_str(&content).map_err(|e| {
            PgChatError::config(format!(
                "Settings error in {}:\n  {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(settings.normalized())
    }

    /// Writes all settings, replacing the previous file.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PgChatError::config(format!("Failed to create settings directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(&settings.clone().normalized())
            .map_err(|e| PgChatError::internal(format!("Failed to serialize settings: {e}")))?;

        std::fs::write(&self.path, content)
            .map_err(|e| PgChatError::config(format!("Failed to write settings: {e}")))?;

        tracing::info!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}
