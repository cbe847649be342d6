#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Ticker Proxy - Cached Price Aggregator
//!
//! An HTTP service that answers `GET /prices` with the last traded price of
//! a fixed set of markets, fetched concurrently from the CoinEx ticker API
//! and cached for a short freshness window.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Market table, price snapshots, TTL cache
//!   - `market`: Symbol/market identifiers and complete snapshots
//!   - `cache`: Single-entry snapshot cache with an injectable clock
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: `PriceSource` trait and its error type
//!   - `services`: Fan-out aggregator and the request orchestrator
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `coinex`: HTTP client for the ticker endpoint
//!   - `http`: axum router and server
//!   - `config`: Configuration from the environment
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//!                      hit
//! GET /prices ──► TtlCache ───────────────────────────────► 200 JSON
//!                    │ miss                                    ▲
//!                    ▼                                         │
//!              FanOutAggregator ──► CoinEx (one task/market) ──┤ all ok
//!                                                              │
//!                                           first error ──► 500 text
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market table, snapshots, and cache.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::{Clock, DEFAULT_FRESHNESS_WINDOW, ManualClock, SystemClock, TtlCache};
pub use domain::market::{MarketId, MarketSpec, MarketSpecError, PriceSnapshot, SymbolKey};

// Application
pub use application::ports::{PriceSource, PriceSourceError};
pub use application::services::{
    AggregationError, FailurePolicy, FanOutAggregator, Origin, PriceLookup, PriceService,
    PriceServiceConfig, RefreshMode,
};

// Infrastructure config
pub use infrastructure::config::{
    CacheSettings, ConfigError, ProxyConfig, ServerSettings, UpstreamSettings,
};

// Upstream client
pub use infrastructure::coinex::{CoinExClient, CoinExConfig, CoinExError};

// HTTP server
pub use infrastructure::http::{HttpState, PriceServer, ServerError, router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
