//! Client session tests over the in-process transport.

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use pg_chat::llm::{MockLlmClient, MockStep, ModelEvent, Role};
use pg_chat::mcp::MockToolConnector;
use pg_chat::protocol::{InvocationState, MessagePart};
use pg_chat::session::render;
use pg_chat::session::{ChatSession, InProcessTransport};
use pg_chat::settings::Settings;

use super::orchestrator;

fn settings() -> Settings {
    Settings {
        api_key: Some("test-key".to_string()),
        db_url: Some("postgres://localhost/app".to_string()),
        custom_instructions: None,
    }
}

fn session(llm: &MockLlmClient, tools: &MockToolConnector, settings: Settings) -> ChatSession {
    let transport = InProcessTransport::new(Arc::new(orchestrator(llm, tools)));
    ChatSession::new(Arc::new(transport), settings)
}

/// Scenario: AutoFix repairs a failed query
///
/// Given a turn whose query fails and whose answer reports the database error
/// When the user runs AutoFix with a hint
/// Then a repair turn is sent, the fixed query runs, and the error is cleared
#[tokio::test]
async fn test_auto_fix_end_to_end() {
    let llm = MockLlmClient::new()
        .with_tool_call("query", json!({ "sql": "SELECT * FROM \"Users\"" }))
        .with_text("⚠️ Database Error: relation \"Users\" does not exist\n\nTry AutoFix.")
        .with_tool_call("query", json!({ "sql": "SELECT * FROM users" }))
        .with_text("Fixed: the table is lowercase ✅");
    let tools = MockToolConnector::new()
        .with_query_failure("\"Users\"", "relation \"Users\" does not exist");
    let mut session = session(&llm, &tools, settings());

    session.submit("Show me all users").await.unwrap();

    assert_eq!(
        session.db_error().map(|e| e.message.as_str()),
        Some("relation \"Users\" does not exist")
    );
    assert!(!session.is_loading());

    session.set_fix_context("table names are lowercase");
    let reply = session.auto_fix().await.unwrap().clone();

    assert_eq!(reply.content, "Fixed: the table is lowercase ✅");
    assert!(session.db_error().is_none());
    assert!(!session.is_fixing());
    assert_eq!(session.fix_context(), "");
    assert_eq!(session.messages().len(), 3);

    let requests = llm.requests();
    assert_eq!(requests.len(), 4);
    let repair = &requests[2];
    assert_eq!(repair.messages.len(), 1);
    assert_eq!(
        repair.messages.first().map(|m| (m.role, m.text())),
        Some((
            Role::User,
            "Fix this database error: relation \"Users\" does not exist".to_string()
        ))
    );
    assert!(repair.system.contains("table names are lowercase"));
    assert_eq!(tools.close_count(), 2);
}

/// Scenario: Setup failure reaches the transcript
///
/// Given settings without an API key
/// When the user submits a message
/// Then the reply is the setup error and AutoFix is offered for it
#[tokio::test]
async fn test_setup_failure_message() {
    let llm = MockLlmClient::new();
    let tools = MockToolConnector::new();
    let mut session = session(
        &llm,
        &tools,
        Settings {
            api_key: None,
            ..settings()
        },
    );

    let message = session.submit("hi").await.unwrap().clone();

    assert_eq!(message.content, "⚠️ Error: API key is not configured");
    assert!(render::is_error_message(&message));
    assert_eq!(
        session.db_error().map(|e| e.message.as_str()),
        Some("API key is not configured")
    );
}

/// Scenario: The model drops mid-answer after a query
///
/// Given a model that fails while answering
/// When the reply is folded into the transcript
/// Then the message carries the structured error and AutoFix targets the query
#[tokio::test]
async fn test_mid_stream_failure_sets_error_details() {
    let llm = MockLlmClient::new()
        .with_tool_call("query", json!({ "sql": "SELECT 1" }))
        .with_step(MockStep::FailMidStream(
            vec![ModelEvent::TextDelta("The answer is".to_string())],
            "connection reset".to_string(),
        ));
    let tools = MockToolConnector::new();
    let mut session = session(&llm, &tools, settings());

    let message = session.submit("hi").await.unwrap().clone();

    let details = message.error_details.clone().expect("error details");
    assert_eq!(details.message, "connection reset");
    assert_eq!(details.sql.as_deref(), Some("SELECT 1"));
    assert_eq!(details.tool_name.as_deref(), Some("query"));
    assert!(message.content.starts_with("The answer is"));
    assert!(message.content.contains("⚠️ Database Error: connection reset"));
    assert_eq!(session.db_error(), Some(&details));
}

/// Scenario: Progress updates while streaming
///
/// Given a turn with one query
/// When the session receives the stream
/// Then the callback sees the chip go from in-flight to resolved
#[tokio::test]
async fn test_streaming_updates() {
    let llm = MockLlmClient::new()
        .with_tool_call("query", json!({ "sql": "SELECT count(*)\n  FROM users" }))
        .with_text("3 users ✅");
    let tools = MockToolConnector::new();
    let mut session = session(&llm, &tools, settings());

    let mut states = Vec::new();
    let message = session
        .submit_with("How many users?", |m| {
            if let Some(invocation) = m.tool_invocations().next() {
                states.push(invocation.state);
            }
        })
        .await
        .unwrap()
        .clone();

    assert_eq!(states.first(), Some(&InvocationState::PartialCall));
    assert_eq!(states.last(), Some(&InvocationState::Result));
    assert!(states.windows(2).all(|w| w[0] <= w[1]));

    let chips = render::tool_chips(&message);
    assert_eq!(chips.len(), 1);
    assert_eq!(chips[0].render(0), "[🛢 SELECT count(*) FROM users]");
    assert_eq!(chips[0].clipboard_text(), "SELECT count(*)\n  FROM users");
    assert!(matches!(
        message.parts.last(),
        Some(MessagePart::Text { text }) if text == "3 users ✅"
    ));
    assert_eq!(message.content, "3 users ✅");
}
