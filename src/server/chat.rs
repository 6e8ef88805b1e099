//! `POST /api/chat`.
//!
//! Every outcome is answered with status 200. Failures come back as a JSON
//! envelope plus the `X-DB-Error` header; successful turns as a data stream.

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::orchestrator::ChatOutcome;
use crate::protocol::{ChatRequest, ErrorEnvelope, StreamPart, DATA_STREAM_HEADER, DB_ERROR_HEADER};

use super::AppState;

/// Content type of data stream responses.
pub const DATA_STREAM_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Handles one chat request.
///
/// The body is taken as raw bytes so malformed JSON is reported through the
/// envelope instead of an extractor rejection.
pub async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected malformed chat request");
            let envelope = ErrorEnvelope::setup_failure(format!("Invalid request body: {e}"));
            return envelope_response(envelope);
        }
    };

    match state.orchestrator.handle(request).await {
        ChatOutcome::Stream(parts) => stream_response(parts),
        ChatOutcome::Envelope(envelope) => envelope_response(envelope),
    }
}

fn stream_response(parts: BoxStream<'static, StreamPart>) -> Response {
    let body = Body::from_stream(
        parts.map(|part| Ok::<_, std::convert::Infallible>(Bytes::from(part.encode()))),
    );

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(DATA_STREAM_CONTENT_TYPE)),
            (
                HeaderName::from_static(DATA_STREAM_HEADER),
                HeaderValue::from_static("v1"),
            ),
        ],
        body,
    )
        .into_response()
}

fn envelope_response(envelope: ErrorEnvelope) -> Response {
    let header_value = HeaderValue::from_str(&envelope.header_value()).ok();
    let mut response = (StatusCode::OK, axum::Json(envelope)).into_response();
    if let Some(value) = header_value {
        response
            .headers_mut()
            .insert(HeaderName::from_static(DB_ERROR_HEADER), value);
    }
    response
}
