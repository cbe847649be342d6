//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceSource`: Fetches the last traded price of one upstream market

use async_trait::async_trait;

use crate::domain::market::MarketId;

// =============================================================================
// Price Source
// =============================================================================

/// Price source error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceSourceError {
    /// Network-level failure reaching the ticker endpoint.
    #[error("upstream unreachable for {market}: {message}")]
    Unreachable {
        /// Market being fetched.
        market: String,
        /// Error details.
        message: String,
    },

    /// Upstream answered with a non-success status.
    #[error("upstream rejected {market} with status {status}: {body}")]
    Rejected {
        /// Market being fetched.
        market: String,
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Response did not contain a usable last price.
    #[error("malformed upstream response for {market}: {message}")]
    Malformed {
        /// Market being fetched.
        market: String,
        /// Error details.
        message: String,
    },
}

impl PriceSourceError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "unreachable",
            Self::Rejected { .. } => "rejected",
            Self::Malformed { .. } => "malformed",
        }
    }
}

/// Port for looking up one market's last price.
///
/// Implementations perform a single attempt and never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch the last traded price for `market`.
    async fn fetch(&self, market: &MarketId) -> Result<f64, PriceSourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_labels() {
        let unreachable = PriceSourceError::Unreachable {
            market: "ETHUSDC".to_string(),
            message: "connection refused".to_string(),
        };
        let rejected = PriceSourceError::Rejected {
            market: "ETHUSDC".to_string(),
            status: 503,
            body: String::new(),
        };
        let malformed = PriceSourceError::Malformed {
            market: "ETHUSDC".to_string(),
            message: "missing field `last`".to_string(),
        };

        assert_eq!(unreachable.kind(), "unreachable");
        assert_eq!(rejected.kind(), "rejected");
        assert_eq!(malformed.kind(), "malformed");
    }

    #[test]
    fn error_display_names_market() {
        let err = PriceSourceError::Malformed {
            market: "BNBUSDC".to_string(),
            message: "invalid float literal".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "malformed upstream response for BNBUSDC: invalid float literal"
        );
    }
}
