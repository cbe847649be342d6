//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Cache**: Hits and misses of the price snapshot cache
//! - **Upstream**: Per-market fetch outcomes and latency
//! - **Aggregation**: Round outcomes and latency
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the HTTP server port. Recording is a
//! no-op until [`init_metrics`] installs the recorder.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::application::ports::PriceSourceError;
use crate::application::services::Origin;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "ticker_proxy_cache_lookups_total",
        "Price snapshot lookups by result (cache or upstream)"
    );
    describe_counter!(
        "ticker_proxy_upstream_fetches_total",
        "Per-market upstream fetches by outcome"
    );
    describe_histogram!(
        "ticker_proxy_upstream_fetch_seconds",
        "Latency of a single upstream ticker request"
    );
    describe_counter!(
        "ticker_proxy_aggregations_total",
        "Aggregation rounds by outcome"
    );
    describe_histogram!(
        "ticker_proxy_aggregation_seconds",
        "Latency of a full fan-out aggregation round"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record where a price lookup was served from.
pub fn record_cache_lookup(origin: Origin) {
    counter!(
        "ticker_proxy_cache_lookups_total",
        "result" => match origin {
            Origin::Cache => "hit",
            Origin::Upstream => "miss",
        }
    )
    .increment(1);
}

/// Record one upstream fetch.
pub fn record_upstream_fetch(duration: Duration, error: Option<&PriceSourceError>) {
    let outcome = error.map_or("ok", PriceSourceError::kind);
    counter!("ticker_proxy_upstream_fetches_total", "outcome" => outcome).increment(1);
    histogram!("ticker_proxy_upstream_fetch_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Record one aggregation round.
pub fn record_aggregation(duration: Duration, succeeded: bool) {
    let outcome = if succeeded { "ok" } else { "failed" };
    counter!("ticker_proxy_aggregations_total", "outcome" => outcome).increment(1);
    histogram!("ticker_proxy_aggregation_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_cache_lookup(Origin::Cache);
        record_upstream_fetch(Duration::from_millis(5), None);
        record_aggregation(Duration::from_millis(20), false);
    }

    #[test]
    fn handle_absent_before_init() {
        // Unit tests never install the global recorder.
        assert!(get_metrics_handle().is_none());
    }
}
