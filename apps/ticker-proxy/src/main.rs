//! Ticker Proxy Binary
//!
//! Starts the cached price aggregation server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ticker-proxy
//! ```
//!
//! # Environment Variables
//!
//! - `TICKER_PROXY_PORT`: HTTP port (default: 8080)
//! - `TICKER_PROXY_UPSTREAM_URL`: Ticker API base (default: <https://api.coinex.com/v1>)
//! - `TICKER_PROXY_UPSTREAM_TIMEOUT_MS`: Per-request timeout (default: 5000)
//! - `TICKER_PROXY_CACHE_TTL_SECS`: Cache freshness window (default: 10)
//! - `TICKER_PROXY_MARKETS`: `key=MARKET,...` table (default: ban, bnb, eth, matic, ftm)
//! - `TICKER_PROXY_SINGLE_FLIGHT`: Collapse concurrent misses (default: false)
//! - `TICKER_PROXY_CANCEL_ON_FAILURE`: Abort sibling fetches on failure (default: false)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use ticker_proxy::infrastructure::telemetry;
use ticker_proxy::{
    CoinExClient, CoinExConfig, FanOutAggregator, HttpState, PriceServer, PriceService,
    ProxyConfig, TtlCache, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    let telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(otlp = telemetry_guard.exporting(), "Starting ticker proxy");

    let _metrics_handle = init_metrics();

    let config = ProxyConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let client = CoinExClient::new(&CoinExConfig::from(config.upstream.clone()))
        .context("failed to build upstream client")?;
    let aggregator = FanOutAggregator::new(Arc::new(client));
    let cache = Arc::new(TtlCache::new(config.cache.freshness_window));
    let service = Arc::new(PriceService::new(
        config.markets.clone(),
        cache,
        aggregator,
        config.cache.service_config(),
    ));

    let state = Arc::new(HttpState::new(env!("CARGO_PKG_VERSION"), service));
    let server = PriceServer::new(config.server.port, state, shutdown_token.clone());

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        await_shutdown().await;
        signal_token.cancel();
    });

    tracing::info!("Ticker proxy ready");

    server.run().await?;

    tracing::info!("Ticker proxy stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    let markets: Vec<String> = config
        .markets
        .iter()
        .map(|entry| format!("{}={}", entry.symbol, entry.market))
        .collect();

    tracing::info!(
        port = config.server.port,
        upstream = %config.upstream.base_url,
        timeout_ms = config.upstream.timeout.as_millis(),
        freshness_secs = config.cache.freshness_window.as_secs(),
        single_flight = config.cache.single_flight,
        cancel_on_failure = config.cache.cancel_on_failure,
        "Configuration loaded"
    );
    tracing::debug!(markets = %markets.join(","), "Market table");
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
