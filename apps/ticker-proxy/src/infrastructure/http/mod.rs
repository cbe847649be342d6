//! HTTP Surface
//!
//! axum server exposing the aggregated prices plus the usual operational
//! endpoints.
//!
//! # Endpoints
//!
//! - `GET /prices` - JSON object of symbol to last price
//! - `OPTIONS /prices` - CORS preflight, never touches the cache
//! - `GET /health` - JSON health status with cache state
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! Anything else answers `404` with a plain-text body.
//!
//! # Design
//!
//! Every `/prices` response, including failures, carries
//! `Access-Control-Allow-Origin: *` so browser clients can read the error
//! text. Failures are a single `500` whose body is the aggregation error.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{AggregationError, PriceService};
use crate::infrastructure::metrics::get_metrics_handle;

const PLAIN_TEXT: &str = "text/plain; charset=utf-8";

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP handlers.
pub struct HttpState {
    version: String,
    started_at: Instant,
    service: Arc<PriceService>,
}

impl HttpState {
    /// Create handler state around a price service.
    #[must_use]
    pub fn new(version: impl Into<String>, service: Arc<PriceService>) -> Self {
        Self {
            version: version.into(),
            started_at: Instant::now(),
            service,
        }
    }
}

// =============================================================================
// Router
// =============================================================================

/// Build the application router.
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/prices", get(prices_handler).options(preflight_handler))
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found_handler)
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// Price HTTP server.
pub struct PriceServer {
    port: u16,
    state: Arc<HttpState>,
    cancel: CancellationToken,
}

impl PriceServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HttpState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Price server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Price server stopped");
        Ok(())
    }
}

// =============================================================================
// Price Handlers
// =============================================================================

async fn prices_handler(State(state): State<Arc<HttpState>>) -> Result<Response, ApiError> {
    let lookup = state.service.prices().await?;
    let body = serde_json::to_string(&*lookup.snapshot)
        .map_err(|e| ApiError::Encode(e.to_string()))?;

    tracing::debug!(origin = lookup.origin.as_str(), "/prices | served");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response())
}

async fn preflight_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        "OK",
    )
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        [(header::CONTENT_TYPE, PLAIN_TEXT)],
        "404",
    )
}

/// Failure of a `/prices` request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The aggregation round failed.
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    /// The snapshot could not be encoded.
    #[error("failed to encode prices: {0}")]
    Encode(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "/prices | request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            [
                (header::CONTENT_TYPE, PLAIN_TEXT),
                (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            ],
            self.to_string(),
        )
            .into_response()
    }
}

// =============================================================================
// Health Handlers
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" with a fresh snapshot cached, "idle" otherwise.
    pub status: HealthStatus,
    /// Proxy version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Cache state.
    pub cache: CacheStatus,
    /// Number of configured markets.
    pub markets: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// A fresh snapshot is cached.
    Healthy,
    /// Nothing fresh cached; the next request goes upstream.
    Idle,
}

/// Cache state as seen by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    /// Whether the cached snapshot would be served.
    pub fresh: bool,
    /// Seconds since the cached snapshot was fetched, if any.
    pub age_secs: Option<f64>,
    /// Freshness window in seconds.
    pub freshness_window_secs: f64,
}

async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(build_health_response(&state)))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::CONTENT_TYPE, "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [(
                    header::CONTENT_TYPE,
                    "text/plain; version=0.0.4; charset=utf-8",
                )],
                handle.render(),
            )
        },
    )
}

fn build_health_response(state: &HttpState) -> HealthResponse {
    let cache = state.service.cache();
    let fresh = cache.is_fresh();

    HealthResponse {
        status: if fresh {
            HealthStatus::Healthy
        } else {
            HealthStatus::Idle
        },
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        cache: CacheStatus {
            fresh,
            age_secs: cache.age().map(|age| age.as_secs_f64()),
            freshness_window_secs: cache.freshness_window().as_secs_f64(),
        },
        markets: state.service.markets().len(),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Price server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
