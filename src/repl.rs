//! Line-oriented chat client.
//!
//! Reads messages from stdin and streams replies to stdout. Lines starting
//! with `/` are commands.

use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use pg_chat::error::Result;
use pg_chat::protocol::{ChatMessage, InvocationState};
use pg_chat::session::clipboard::{self, ClipboardBackend};
use pg_chat::session::render::{self, ToolChip};
use pg_chat::session::ChatSession;

const HELP: &str = "\
Commands:
  /fix [hint]   Ask the assistant to fix the last database error
  /copy [n]     Copy the SQL of query n (default: the last one) to the clipboard
  /settings     Show the settings in use
  /help         Show this help
  /quit         Exit";

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Message(String),
    Fix(Option<String>),
    Copy(Option<usize>),
    Settings,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));
    let rest = (!rest.is_empty()).then(|| rest.to_string());

    match name {
        "fix" | "autofix" => Input::Fix(rest),
        "copy" => match rest {
            None => Input::Copy(None),
            Some(n) => match n.parse() {
                Ok(n) => Input::Copy(Some(n)),
                Err(_) => Input::Unknown(line.to_string()),
            },
        },
        "settings" => Input::Settings,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        _ => Input::Unknown(line.to_string()),
    }
}

/// Prints a streaming assistant message incrementally.
#[derive(Default)]
struct StreamPrinter {
    printed_text: usize,
    printed_chips: usize,
    in_text: bool,
}

impl StreamPrinter {
    fn update(&mut self, message: &ChatMessage) {
        let mut out = std::io::stdout().lock();

        let ready: Vec<ToolChip> = message
            .tool_invocations()
            .filter(|i| i.state >= InvocationState::Call)
            .map(ToolChip::from_invocation)
            .collect();
        for chip in ready.iter().skip(self.printed_chips) {
            if self.in_text {
                let _ = writeln!(out);
                self.in_text = false;
            }
            let _ = writeln!(out, "  {}", chip.render(0));
        }
        self.printed_chips = self.printed_chips.max(ready.len());

        let visible = render::display_text(&message.content);
        if visible.len() > self.printed_text {
            if let Some(delta) = visible.get(self.printed_text..) {
                let _ = write!(out, "{delta}");
                self.in_text = true;
            }
            self.printed_text = visible.len();
        }
        let _ = out.flush();
    }

    /// Ends the reply; returns whether anything was printed.
    fn finish(&mut self) -> bool {
        if self.in_text {
            println!();
        }
        self.printed_text > 0 || self.printed_chips > 0
    }
}

/// Sends one message and prints the reply.
pub async fn ask_once(session: &mut ChatSession, text: &str) -> Result<()> {
    let mut printer = StreamPrinter::default();
    session.submit_with(text, |m| printer.update(m)).await?;
    let streamed = printer.finish();
    print_turn_footer(session, streamed);
    Ok(())
}

/// Runs the interactive loop until `/quit` or end of input.
pub async fn run(session: &mut ChatSession) -> Result<()> {
    println!("pg-chat {} - type /help for commands", env!("CARGO_PKG_VERSION"));
    if !session.settings().is_configured() {
        println!("Settings are incomplete; run `pg-chat config --api-key ... --db-url ...`.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read input");
                break;
            }
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Message(text) => ask_once(session, &text).await?,
            Input::Fix(hint) => {
                if let Some(hint) = hint {
                    session.set_fix_context(hint);
                }
                let mut printer = StreamPrinter::default();
                match session.auto_fix_with(|m| printer.update(m)).await {
                    Ok(_) => {
                        let streamed = printer.finish();
                        print_turn_footer(session, streamed);
                    }
                    Err(e) => println!("{}", e.message()),
                }
            }
            Input::Copy(index) => copy_sql(session, index),
            Input::Settings => println!("{}", session.settings().display_summary()),
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
            Input::Unknown(command) => println!("Unknown command: {command}. Type /help."),
        }
    }

    Ok(())
}

/// Prints what streaming did not show, then the AutoFix hint.
fn print_turn_footer(session: &ChatSession, streamed: bool) {
    if !streamed {
        if let Some(last) = session.messages().last() {
            for line in render::render_message(last, 0) {
                println!("{line}");
            }
        }
    }
    println!();
    if let Some(error) = session.db_error() {
        println!("Database error: {}", error.message);
        println!("Type /fix (optionally with a hint) to let the assistant repair it.");
    }
}

fn copy_sql(session: &ChatSession, index: Option<usize>) {
    let chips: Vec<ToolChip> = session
        .messages()
        .iter()
        .flat_map(render::tool_chips)
        .collect();

    let chip = match index {
        Some(n) => n.checked_sub(1).and_then(|i| chips.get(i)),
        None => chips.last(),
    };

    let Some(chip) = chip else {
        println!("No query to copy.");
        return;
    };

    match clipboard::copy(chip.clipboard_text()) {
        Ok(ClipboardBackend::Native) => println!("Copied SQL to clipboard."),
        Ok(ClipboardBackend::Osc52) => println!("\nCopied SQL via terminal clipboard."),
        Err(e) => println!("{}", e.message()),
    }
}
