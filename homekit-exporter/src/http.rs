//! Scrape endpoint: exposition text plus liveness and readiness probes.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{info, trace};

use crate::collector::SharedRegistry;

/// Content type of the Prometheus text exposition format.
const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Errors raised by the scrape server.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Clone)]
struct ScrapeState {
    registry: SharedRegistry,
    metrics_path: String,
}

fn create_router(registry: SharedRegistry, metrics_path: &str) -> Router {
    let state = ScrapeState {
        registry,
        metrics_path: metrics_path.to_string(),
    };

    Router::new()
        .route(metrics_path, get(scrape))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .fallback(not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn scrape(State(state): State<ScrapeState>) -> Response {
    state.registry.record_scrape();
    let body = state.registry.render();
    trace!(bytes = body.len(), "Serving scrape");

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        body,
    )
        .into_response()
}

async fn health() -> &'static str {
    "healthy\n"
}

/// 200 once a poll cycle has succeeded, 503 before.
async fn ready(State(state): State<ScrapeState>) -> Response {
    if !state.registry.is_ready() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no successful poll yet\n",
        )
            .into_response();
    }

    let body = format!("ready ({} series)\n", state.registry.series_count());
    (StatusCode::OK, body).into_response()
}

async fn not_found(State(state): State<ScrapeState>) -> Response {
    (
        StatusCode::NOT_FOUND,
        format!("not found - metrics are served at {}\n", state.metrics_path),
    )
        .into_response()
}

/// Resolve once the shutdown flag is set or its sender is gone.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    // `wait_for` checks the current value first, so a flag set before
    // the server started is honored too.
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// HTTP server exposing the registry.
pub struct HttpServer {
    registry: SharedRegistry,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(registry: SharedRegistry, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            registry,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), HttpError> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|source| HttpError::Bind {
                addr: self.listen_addr,
                source,
            })?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), HttpError> {
        let addr = listener.local_addr().unwrap_or(self.listen_addr);
        info!(addr = %addr, path = %self.metrics_path, "Scrape endpoint listening");

        let router = create_router(self.registry, &self.metrics_path);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_requested(shutdown).await;
                info!("Scrape endpoint draining");
            })
            .await
            .map_err(HttpError::Serve)?;

        info!("Scrape endpoint stopped");
        Ok(())
    }
}
