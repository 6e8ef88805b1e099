//! Request sending shared by the HTTP providers.

use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{PgChatError, Result};

/// Maximum number of retry attempts for transient errors.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Maps a non-success status and body to an error and whether it is retryable.
pub(crate) type ErrorParser = fn(StatusCode, &str) -> (PgChatError, bool);

/// Sends a request, retrying rate limits, 5xx responses and connect failures.
///
/// Only the initial request is retried; once a success status arrives the
/// streaming body belongs to the caller.
pub(crate) async fn send_with_retry(
    provider: &'static str,
    build: impl Fn() -> RequestBuilder,
    parse_error: ErrorParser,
) -> Result<Response> {
    let mut last_error = None;
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        debug!(provider, attempt, max = MAX_RETRY_ATTEMPTS, "LLM API request");

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                let (error, is_retryable) = parse_error(status, &body);
                last_error = Some(error);

                if !is_retryable || attempt >= MAX_RETRY_ATTEMPTS {
                    break;
                }

                warn!(
                    "{} API request failed (attempt {}), retrying in {:?}: {}",
                    provider, attempt, delay, status
                );
            }
            Err(e) => {
                let is_retryable = e.is_timeout() || e.is_connect();
                let error = if e.is_timeout() {
                    PgChatError::llm("Request timed out. Try again.")
                } else if e.is_connect() {
                    PgChatError::llm(format!(
                        "Failed to connect to {} API. Check your network.",
                        provider
                    ))
                } else {
                    PgChatError::llm(format!("Request failed: {}", e))
                };
                last_error = Some(error);

                if !is_retryable || attempt >= MAX_RETRY_ATTEMPTS {
                    break;
                }

                warn!(
                    "{} API request failed (attempt {}), retrying in {:?}",
                    provider, attempt, delay
                );
            }
        }

        tokio::time::sleep(delay).await;
        delay *= 2; // Exponential backoff
    }

    Err(last_error.unwrap_or_else(|| PgChatError::llm("No request attempt was made")))
}
