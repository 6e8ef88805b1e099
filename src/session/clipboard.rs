//! Copying tool SQL to the clipboard.
//!
//! Uses the native clipboard when one is available and falls back to the
//! OSC 52 terminal escape sequence otherwise.

use arboard::Clipboard;
use std::io::Write;

use crate::error::{PgChatError, Result};

/// How text reached the clipboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipboardBackend {
    /// Native clipboard via arboard.
    Native,
    /// Terminal OSC 52 escape sequence.
    Osc52,
}

/// Copies `text`, returning the backend that took it.
pub fn copy(text: &str) -> Result<ClipboardBackend> {
    match Clipboard::new().and_then(|mut clipboard| clipboard.set_text(text)) {
        Ok(()) => Ok(ClipboardBackend::Native),
        Err(e) => {
            tracing::debug!(error = %e, "Native clipboard unavailable, using OSC 52");
            copy_osc52(text, &mut std::io::stdout())?;
            Ok(ClipboardBackend::Osc52)
        }
    }
}

/// Writes the OSC 52 sequence for `text` to `out`.
fn copy_osc52(text: &str, out: &mut impl Write) -> Result<()> {
    out.write_all(osc52_sequence(text).as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| PgChatError::internal(format!("Failed to write OSC 52: {e}")))
}

fn osc52_sequence(text: &str) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    format!("\x1b]52;c;{}\x1b\\", STANDARD.encode(text))
}
