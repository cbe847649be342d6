//! CoinEx ticker adapter.
//!
//! Implements [`PriceSource`] against the CoinEx v1 REST API:
//!
//! ```text
//! GET {base}/market/ticker?market=ETHUSDC
//! {"code": 0, "data": {"ticker": {"last": "3400.50", ...}}, "message": "OK"}
//! ```
//!
//! One attempt per call. Timeouts come from the underlying HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::ports::{PriceSource, PriceSourceError};
use crate::domain::market::MarketId;

/// Production CoinEx v1 API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.coinex.com/v1";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest upstream error body kept in a rejection.
const MAX_ERROR_BODY_LEN: usize = 256;

/// CoinEx client configuration.
#[derive(Debug, Clone)]
pub struct CoinExConfig {
    /// API base URL without trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for CoinExConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// CoinEx client construction error.
#[derive(Debug, thiserror::Error)]
pub enum CoinExError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// CoinEx ticker client.
#[derive(Debug, Clone)]
pub struct CoinExClient {
    client: reqwest::Client,
    base_url: String,
}

impl CoinExClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `CoinExError::ClientBuild` if the TLS backend cannot be
    /// initialised.
    pub fn new(config: &CoinExConfig) -> Result<Self, CoinExError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("ticker-proxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoinExError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn ticker_endpoint(&self) -> String {
        format!("{}/market/ticker", self.base_url)
    }
}

#[async_trait]
impl PriceSource for CoinExClient {
    async fn fetch(&self, market: &MarketId) -> Result<f64, PriceSourceError> {
        let endpoint = self.ticker_endpoint();
        tracing::debug!(market = %market, endpoint = %endpoint, "Fetching ticker");

        let response = self
            .client
            .get(&endpoint)
            .query(&[("market", market.as_str())])
            .send()
            .await
            .map_err(|e| PriceSourceError::Unreachable {
                market: market.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PriceSourceError::Rejected {
                market: market.to_string(),
                status: status.as_u16(),
                body: truncate(body, MAX_ERROR_BODY_LEN),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| PriceSourceError::Unreachable {
                market: market.to_string(),
                message: e.to_string(),
            })?;

        parse_last_price(market.as_str(), &body)
    }
}

// =============================================================================
// Response parsing
// =============================================================================

#[derive(Debug, Deserialize)]
struct TickerResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<TickerData>,
}

#[derive(Debug, Deserialize)]
struct TickerData {
    ticker: Ticker,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    last: String,
}

/// Extract `data.ticker.last` from a ticker response body.
///
/// # Errors
///
/// Returns `PriceSourceError::Malformed` when the body is not the expected
/// shape, CoinEx reports a non-zero code, or the price is not a finite
/// number.
pub fn parse_last_price(market: &str, body: &str) -> Result<f64, PriceSourceError> {
    let malformed = |message: String| PriceSourceError::Malformed {
        market: market.to_string(),
        message,
    };

    let response: TickerResponse =
        serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;

    if response.code != 0 {
        return Err(malformed(format!(
            "upstream error code {}: {}",
            response.code,
            response.message.unwrap_or_default()
        )));
    }

    let last = response
        .data
        .ok_or_else(|| malformed("missing field `data`".to_string()))?
        .ticker
        .last;

    let price: f64 = last
        .parse()
        .map_err(|e| malformed(format!("last price {last:?}: {e}")))?;

    if !price.is_finite() {
        return Err(malformed(format!("last price {last:?} is not finite")));
    }

    Ok(price)
}

fn truncate(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut cut = max;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn ticker(last: &str) -> String {
        format!(
            r#"{{"code":0,"data":{{"date":1700000000000,"ticker":{{"buy":"1","last":"{last}","sell":"2"}}}},"message":"OK"}}"#
        )
    }

    #[test_case("3400.50", 3400.5 ; "decimal")]
    #[test_case("600.25", 600.25 ; "two places")]
    #[test_case("0.00420000", 0.0042 ; "small")]
    fn parses_last_price(last: &str, expected: f64) {
        assert_eq!(parse_last_price("ETHUSDC", &ticker(last)).unwrap(), expected);
    }

    #[test_case("abc" ; "not numeric")]
    #[test_case("" ; "empty")]
    #[test_case("NaN" ; "nan")]
    #[test_case("inf" ; "infinite")]
    #[test_case(" 12 " ; "padded")]
    fn rejects_unusable_price(last: &str) {
        let err = parse_last_price("ETHUSDC", &ticker(last)).unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[test_case("not json" ; "garbage")]
    #[test_case(r#"{"code":0,"data":{}}"# ; "missing ticker")]
    #[test_case(r#"{"code":0}"# ; "missing data")]
    #[test_case(r#"{"code":0,"data":{"ticker":{"last":3400.5}}}"# ; "numeric last")]
    fn rejects_unexpected_shape(body: &str) {
        let err = parse_last_price("ETHUSDC", body).unwrap_err();
        assert!(matches!(err, PriceSourceError::Malformed { .. }));
    }

    #[test]
    fn surfaces_upstream_error_code() {
        let body = r#"{"code":2,"data":{},"message":"Invalid market"}"#;
        let err = parse_last_price("NOPE", body).unwrap_err();
        assert_eq!(
            err.to_string(),
            "malformed upstream response for NOPE: upstream error code 2: Invalid market"
        );
    }

    #[test]
    fn ticker_endpoint_strips_trailing_slash() {
        let client = CoinExClient::new(&CoinExConfig {
            base_url: "http://localhost:9999/v1/".to_string(),
            timeout: DEFAULT_TIMEOUT,
        })
        .unwrap();

        assert_eq!(
            client.ticker_endpoint(),
            "http://localhost:9999/v1/market/ticker"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo".to_string(), 2), "h");
        assert_eq!(truncate("short".to_string(), 256), "short");
    }

    #[test]
    fn default_config() {
        let config = CoinExConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.timeout, Duration::from_secs(5));
    }
}
