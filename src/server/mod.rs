//! HTTP surface of the chat API.
//!
//! [`router`] assembles the routes; [`serve`] binds a listener and runs until
//! a shutdown signal arrives, cancelling in-flight turns on the way out.

mod chat;

pub use chat::{chat_handler, DATA_STREAM_CONTENT_TYPE};

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::{PgChatError, Result};
use crate::orchestrator::Orchestrator;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// Serves the chat API on `bind` until Ctrl-C or SIGTERM.
pub async fn serve(bind: &str, orchestrator: Orchestrator) -> Result<()> {
    let shutdown = orchestrator.shutdown_token();
    let app = router(AppState::new(orchestrator));

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| PgChatError::config(format!("Failed to bind {bind}: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| PgChatError::internal(e.to_string()))?;
    info!(%addr, "Chat API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .map_err(|e| PgChatError::internal(format!("Server error: {e}")))?;

    info!("Chat API stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM, after cancelling `shutdown`.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl-C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = shutdown.cancelled() => {}
    }

    info!("Shutdown signal received, aborting in-flight turns");
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::LimitsConfig;
    use crate::llm::MockLlmClient;
    use crate::mcp::MockToolConnector;

    fn app() -> Router {
        router(AppState::new(Orchestrator::new(
            Arc::new(MockLlmClient::new()),
            Arc::new(MockToolConnector::new()),
            LimitsConfig::default(),
        )))
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let response = app()
            .oneshot(Request::get("/api/other").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
