//! HTTP tests for the chat API.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use futures::StreamExt;
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use tower::ServiceExt;

use pg_chat::llm::MockLlmClient;
use pg_chat::mcp::MockToolConnector;
use pg_chat::protocol::{
    parse_db_error_header, ErrorEnvelope, StreamDecoder, StreamPart, DATA_STREAM_HEADER,
    DB_ERROR_HEADER,
};
use pg_chat::server::{router, AppState};
use pg_chat::session::{ChatTransport, HttpTransport, HttpTransportConfig, ReplyBody};

use super::{chat_request, codes, orchestrator};

fn post_chat(body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

/// Scenario: Streaming a successful turn
///
/// Given a model that queries once and answers
/// When the client posts a chat request
/// Then the response is a data stream ending with the finish-message part
#[tokio::test]
async fn test_chat_streams_data_parts() {
    let llm = MockLlmClient::new()
        .with_tool_call("query", json!({ "sql": "SELECT 1" }))
        .with_text("One ✅");
    let tools = MockToolConnector::new();
    let app = router(AppState::new(orchestrator(&llm, &tools)));
    let body = serde_json::to_vec(&chat_request("hi")).unwrap();

    let response = app.oneshot(post_chat(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(DATA_STREAM_HEADER).unwrap(),
        "v1"
    );
    assert!(response.headers().get(DB_ERROR_HEADER).is_none());

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let mut decoder = StreamDecoder::new();
    let mut parts: Vec<StreamPart> = decoder
        .push(&bytes)
        .into_iter()
        .map(|p| p.unwrap())
        .collect();
    parts.extend(decoder.finish().map(|p| p.unwrap()));

    assert_eq!(codes(&parts), "fb9aef0ed");
    assert_eq!(tools.close_count(), 1);
}

/// Scenario: Missing configuration
///
/// Given a request without an API key
/// When the client posts it
/// Then the reply is a 200 JSON envelope with the X-DB-Error header
#[tokio::test]
async fn test_missing_api_key_envelope() {
    let llm = MockLlmClient::new();
    let tools = MockToolConnector::new();
    let app = router(AppState::new(orchestrator(&llm, &tools)));
    let mut request = chat_request("hi");
    request.api_key = None;

    let response = app
        .oneshot(post_chat(serde_json::to_vec(&request).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let header = response
        .headers()
        .get(DB_ERROR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("X-DB-Error header");
    assert_eq!(
        parse_db_error_header(&header).map(|e| e.message),
        Some("API key is not configured".to_string())
    );

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let envelope: ErrorEnvelope = serde_json::from_slice(&bytes).unwrap();
    assert!(envelope.error);
    assert_eq!(envelope.error_type, "database");
    assert_eq!(envelope.content, "⚠️ Error: API key is not configured");
    assert!(envelope.id.starts_with("error-"));
    assert_eq!(tools.connect_count(), 0);
}

/// Scenario: Malformed body
#[tokio::test]
async fn test_malformed_body_envelope() {
    let llm = MockLlmClient::new();
    let tools = MockToolConnector::new();
    let app = router(AppState::new(orchestrator(&llm, &tools)));

    let response = app.oneshot(post_chat("{not json")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let envelope: ErrorEnvelope = serde_json::from_slice(&bytes).unwrap();
    assert!(envelope.content.starts_with("⚠️ Error: Invalid request body"));
}

/// Scenario: The HTTP client talks to a live server
///
/// Given a server bound to an ephemeral port
/// When the HTTP transport sends a turn and then a misconfigured turn
/// Then it decodes the stream and the envelope with its header
#[tokio::test]
async fn test_http_transport_round_trip() {
    let llm = MockLlmClient::new().with_text("Hello ✅");
    let tools = MockToolConnector::new();
    let app = router(AppState::new(orchestrator(&llm, &tools)));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let transport =
        HttpTransport::new(HttpTransportConfig::new(format!("http://{addr}")).with_timeout(10))
            .unwrap();

    let reply = transport.send(&chat_request("hi")).await.unwrap();
    assert!(reply.db_error_header.is_none());
    let ReplyBody::Stream(parts) = reply.body else {
        panic!("expected a stream");
    };
    let parts: Vec<StreamPart> = parts.map(|p| p.unwrap()).collect().await;
    assert_eq!(codes(&parts), "f0ed");
    assert!(parts.contains(&StreamPart::Text("Hello ✅".to_string())));

    let mut request = chat_request("hi");
    request.db_url = Some("mysql://localhost/app".to_string());
    let reply = transport.send(&request).await.unwrap();
    assert!(reply.db_error_header.is_some());
    let ReplyBody::Envelope(envelope) = reply.body else {
        panic!("expected an envelope");
    };
    assert!(envelope.content.starts_with("⚠️ Error:"));
}

/// Scenario: Server is not running
#[tokio::test]
async fn test_http_transport_unreachable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport =
        HttpTransport::new(HttpTransportConfig::new(format!("http://{addr}")).with_timeout(5))
            .unwrap();

    let err = transport.send(&chat_request("hi")).await.unwrap_err();
    assert!(err.message().contains("Cannot reach chat server"));
}
