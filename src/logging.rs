//! Logging setup for pg-chat.
//!
//! The server logs to stderr. The interactive `ask` client writes to a file so
//! log lines do not interleave with the transcript.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides `RUST_LOG` for pg-chat.
pub const LOG_ENV: &str = "PG_CHAT_LOG";

const DEFAULT_DIRECTIVES: &str = "info,tower_http=debug";

/// Where log lines go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    /// Truncated on every start.
    File(PathBuf),
}

impl LogTarget {
    /// The file target at the platform log location.
    pub fn default_file() -> Self {
        Self::File(get_log_path())
    }
}

/// Installs the global subscriber.
///
/// A file that cannot be created falls back to stderr with a warning.
pub fn init(target: LogTarget) {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter());

    match target {
        LogTarget::Stderr => builder.with_writer(std::io::stderr).init(),
        LogTarget::File(path) => match open_log_file(&path) {
            Ok(file) => builder.with_writer(file).with_ansi(false).init(),
            Err(e) => {
                builder.with_writer(std::io::stderr).init();
                tracing::warn!(path = %path.display(), error = %e, "Logging to stderr instead");
            }
        },
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Returns the path of the client log file.
///
/// `~/.local/state/pg-chat/pg-chat.log` on Linux; the config directory, then
/// the temp directory, elsewhere.
pub fn get_log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::config_dir)
        .map(|dir| dir.join("pg-chat").join("pg-chat.log"))
        .unwrap_or_else(|| std::env::temp_dir().join("pg-chat.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path() {
        let path = get_log_path();
        assert!(path.is_absolute());
        assert!(path.ends_with("pg-chat.log"));
    }

    #[test]
    fn test_open_log_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("pg-chat.log");

        open_log_file(&path).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_default_file_target() {
        assert_eq!(LogTarget::default_file(), LogTarget::File(get_log_path()));
    }
}
