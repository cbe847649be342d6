//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the process
//! edges: HTTP server, configuration, and observability.

/// CoinEx ticker API client.
pub mod coinex;

/// Environment-driven configuration.
pub mod config;

/// axum router and server.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
