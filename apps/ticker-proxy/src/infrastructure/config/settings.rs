//! Proxy Configuration Settings
//!
//! Configuration types for the ticker proxy, loaded from environment
//! variables at startup. Nothing here changes while the process runs.

use std::time::Duration;

use crate::application::services::{FailurePolicy, PriceServiceConfig, RefreshMode};
use crate::domain::cache::DEFAULT_FRESHNESS_WINDOW;
use crate::domain::market::{MarketSpec, MarketSpecError};
use crate::infrastructure::coinex::{CoinExConfig, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// HTTP listen port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Upstream ticker API settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// API base URL.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl From<UpstreamSettings> for CoinExConfig {
    fn from(settings: UpstreamSettings) -> Self {
        Self {
            base_url: settings.base_url,
            timeout: settings.timeout,
        }
    }
}

/// Cache and refresh settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Maximum age at which a snapshot is served without refetching.
    pub freshness_window: Duration,
    /// Queue concurrent misses behind one upstream round.
    pub single_flight: bool,
    /// Cancel sibling fetches once one market fails.
    pub cancel_on_failure: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            single_flight: false,
            cancel_on_failure: false,
        }
    }
}

impl CacheSettings {
    /// Price service behaviour derived from these settings.
    #[must_use]
    pub const fn service_config(&self) -> PriceServiceConfig {
        PriceServiceConfig {
            refresh_mode: if self.single_flight {
                RefreshMode::SingleFlight
            } else {
                RefreshMode::Concurrent
            },
            failure_policy: if self.cancel_on_failure {
                FailurePolicy::CancelStragglers
            } else {
                FailurePolicy::LetFinish
            },
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Server settings.
    pub server: ServerSettings,
    /// Upstream API settings.
    pub upstream: UpstreamSettings,
    /// Cache settings.
    pub cache: CacheSettings,
    /// Markets to aggregate.
    pub markets: MarketSpec,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            upstream: UpstreamSettings::default(),
            cache: CacheSettings::default(),
            markets: MarketSpec::default_markets(),
        }
    }
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the market table is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the market table is invalid or empty, or the
    /// upstream URL is blank.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let server = ServerSettings {
            port: parse_or(&lookup, "TICKER_PROXY_PORT", defaults.server.port),
        };

        let base_url = lookup("TICKER_PROXY_UPSTREAM_URL")
            .unwrap_or_else(|| defaults.upstream.base_url.clone());
        if base_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue(
                "TICKER_PROXY_UPSTREAM_URL".to_string(),
            ));
        }

        let upstream = UpstreamSettings {
            base_url,
            timeout: parse_duration_millis(
                &lookup,
                "TICKER_PROXY_UPSTREAM_TIMEOUT_MS",
                defaults.upstream.timeout,
            ),
        };

        let cache = CacheSettings {
            freshness_window: parse_duration_secs(
                &lookup,
                "TICKER_PROXY_CACHE_TTL_SECS",
                defaults.cache.freshness_window,
            ),
            single_flight: parse_bool(
                &lookup,
                "TICKER_PROXY_SINGLE_FLIGHT",
                defaults.cache.single_flight,
            ),
            cancel_on_failure: parse_bool(
                &lookup,
                "TICKER_PROXY_CANCEL_ON_FAILURE",
                defaults.cache.cancel_on_failure,
            ),
        };

        let markets = match lookup("TICKER_PROXY_MARKETS") {
            Some(table) => MarketSpec::parse(&table)?,
            None => defaults.markets,
        };
        if markets.is_empty() {
            return Err(ConfigError::EmptyValue("TICKER_PROXY_MARKETS".to_string()));
        }

        Ok(Self {
            server,
            upstream,
            cache,
            markets,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Market table could not be parsed.
    #[error("invalid TICKER_PROXY_MARKETS: {0}")]
    InvalidMarkets(#[from] MarketSpecError),
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).map_or(default, |v| {
        matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
