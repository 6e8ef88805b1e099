//! pg-chat - chat with a PostgreSQL database through an LLM.
//!
//! This library exposes the core modules for the binary and the integration tests.

pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod mcp;
pub mod orchestrator;
pub mod protocol;
pub mod server;
pub mod session;
pub mod settings;
