//! Axum HTTP server for the ingest API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use opentelemetry::{global, propagation::Extractor};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::event::EventRouter;
use crate::orchestrator::ShutdownSignal;
use crate::{Error, Result};

use super::handlers;

/// Shared state for the handlers
pub struct AppState {
    pub router: Arc<EventRouter>,
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v: &HeaderValue| v.to_str().ok())
    }
    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k: &HeaderName| k.as_str()).collect()
    }
}

/// Continue the sender's trace when the delivery carries `traceparent`
async fn extract_trace_context(request: Request, next: Next) -> Response {
    let parent_cx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(request.headers()))
    });
    tracing::Span::current().set_parent(parent_cx);
    next.run(request).await
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/events", post(handlers::post_events));

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(handlers::metrics));

    app.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(extract_trace_context)),
    )
    .with_state(state)
}

/// Serve until SIGINT or SIGTERM
///
/// The shutdown signal is triggered as soon as the process is asked to stop so
/// in-flight handlers stop picking up new resources; their events are reported
/// as failed and redelivered.
pub async fn run_server(
    addr: SocketAddr,
    state: Arc<AppState>,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ServerError(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("Event ingest API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
        .map_err(|e| Error::ServerError(format!("Server error: {}", e)))?;

    info!("Event ingest API stopped");
    Ok(())
}

async fn wait_for_shutdown(shutdown: ShutdownSignal) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.trigger();
}
