//! Market Table and Price Snapshot
//!
//! Domain types describing which upstream markets are aggregated and the
//! all-or-nothing price snapshot produced from them.
//!
//! # Invariants
//!
//! - Symbol keys are unique within a [`MarketSpec`].
//! - A [`PriceSnapshot`] always carries exactly the keys of the market table
//!   it was built from, in the same order. There is no way to build a
//!   partial one.

use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

// =============================================================================
// Identifiers
// =============================================================================

/// Short symbol key exposed to clients (e.g. `eth`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolKey(Arc<str>);

impl SymbolKey {
    /// Create a symbol key.
    #[must_use]
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Upstream market identifier (e.g. `ETHUSDC`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarketId(Arc<str>);

impl MarketId {
    /// Create a market identifier.
    #[must_use]
    pub fn new(market: impl AsRef<str>) -> Self {
        Self(Arc::from(market.as_ref()))
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Market Table
// =============================================================================

/// One symbol-to-market binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketEntry {
    /// Key exposed in the aggregated document.
    pub symbol: SymbolKey,
    /// Market queried upstream.
    pub market: MarketId,
}

/// Ordered, immutable table of symbol keys to upstream markets.
///
/// Fixed at process start. Cloning is cheap; entries are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSpec {
    entries: Arc<[MarketEntry]>,
}

impl MarketSpec {
    /// Build a market table from `(symbol, market)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `MarketSpecError` if a key or market is empty, or a key
    /// appears more than once.
    pub fn new<I, K, M>(pairs: I) -> Result<Self, MarketSpecError>
    where
        I: IntoIterator<Item = (K, M)>,
        K: AsRef<str>,
        M: AsRef<str>,
    {
        let mut entries: Vec<MarketEntry> = Vec::new();

        for (key, market) in pairs {
            let key = key.as_ref().trim();
            let market = market.as_ref().trim();

            if key.is_empty() {
                return Err(MarketSpecError::EmptySymbol);
            }
            if market.is_empty() {
                return Err(MarketSpecError::EmptyMarket(key.to_string()));
            }
            if entries.iter().any(|e| e.symbol.as_str() == key) {
                return Err(MarketSpecError::DuplicateSymbol(key.to_string()));
            }

            entries.push(MarketEntry {
                symbol: SymbolKey::new(key),
                market: MarketId::new(market),
            });
        }

        Ok(Self {
            entries: entries.into(),
        })
    }

    /// Markets served when nothing else is configured.
    #[must_use]
    pub fn default_markets() -> Self {
        let entries = [
            ("ban", "BANANOUSDT"),
            ("bnb", "BNBUSDC"),
            ("eth", "ETHUSDC"),
            ("matic", "POLUSDC"),
            ("ftm", "SUSDC"),
        ]
        .into_iter()
        .map(|(symbol, market)| MarketEntry {
            symbol: SymbolKey::new(symbol),
            market: MarketId::new(market),
        })
        .collect::<Vec<_>>();

        Self {
            entries: entries.into(),
        }
    }

    /// Parse a `key=MARKET,key=MARKET` table.
    ///
    /// # Errors
    ///
    /// Returns `MarketSpecError::InvalidPair` for a segment without `=`, or
    /// any error from [`MarketSpec::new`].
    pub fn parse(table: &str) -> Result<Self, MarketSpecError> {
        let pairs = table
            .split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(|segment| {
                segment
                    .split_once('=')
                    .ok_or_else(|| MarketSpecError::InvalidPair(segment.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(pairs)
    }

    /// Number of markets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no markets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = &MarketEntry> {
        self.entries.iter()
    }

    /// Look up an entry by position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&MarketEntry> {
        self.entries.get(index)
    }
}

/// Market table validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketSpecError {
    /// A symbol key was empty.
    #[error("market table contains an empty symbol key")]
    EmptySymbol,
    /// A market identifier was empty.
    #[error("symbol {0} has an empty market identifier")]
    EmptyMarket(String),
    /// A symbol key was repeated.
    #[error("symbol {0} appears more than once")]
    DuplicateSymbol(String),
    /// A table segment was not `key=MARKET`.
    #[error("invalid market pair {0:?}, expected key=MARKET")]
    InvalidPair(String),
}

// =============================================================================
// Price Snapshot
// =============================================================================

/// Complete set of prices for one [`MarketSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
    prices: Vec<(SymbolKey, f64)>,
}

impl PriceSnapshot {
    /// Assemble a snapshot from per-market results indexed by spec position.
    ///
    /// Returns `None` unless every slot is filled.
    #[must_use]
    pub fn assemble(spec: &MarketSpec, prices: Vec<Option<f64>>) -> Option<Self> {
        if prices.len() != spec.len() {
            return None;
        }

        let prices = spec
            .iter()
            .zip(prices)
            .map(|(entry, price)| price.map(|p| (entry.symbol.clone(), p)))
            .collect::<Option<Vec<_>>>()?;

        Some(Self { prices })
    }

    /// Price for a symbol key.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<f64> {
        self.prices
            .iter()
            .find(|(key, _)| key.as_str() == symbol)
            .map(|(_, price)| *price)
    }

    /// Number of prices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Iterate `(symbol, price)` pairs in table order.
    pub fn iter(&self) -> impl Iterator<Item = (&SymbolKey, f64)> {
        self.prices.iter().map(|(key, price)| (key, *price))
    }

    /// Whether this snapshot's keys match `spec` exactly.
    #[must_use]
    pub fn covers(&self, spec: &MarketSpec) -> bool {
        self.prices.len() == spec.len()
            && self
                .prices
                .iter()
                .zip(spec.iter())
                .all(|((key, _), entry)| *key == entry.symbol)
    }
}

impl Serialize for PriceSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, price) in self.iter() {
            map.serialize_entry(key.as_str(), &price)?;
        }
        map.end()
    }
}

// =============================================================================
// Tests
// =============================================================================
