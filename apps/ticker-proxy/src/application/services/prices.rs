//! Price Service
//!
//! Serves the aggregated price document: cache first, fan-out on miss.
//!
//! ```text
//! Check ──hit──► Respond
//!   │
//!  miss
//!   ▼
//! Fetch ──ok──► Publish ──► Respond
//!   │
//!  err
//!   ▼
//! Respond-Error (cache untouched)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::application::services::aggregator::{AggregationError, FailurePolicy, FanOutAggregator};
use crate::domain::cache::TtlCache;
use crate::domain::market::{MarketSpec, PriceSnapshot};
use crate::infrastructure::metrics;

/// How concurrent cache misses are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshMode {
    /// Every miss runs its own aggregation round; last writer wins.
    #[default]
    Concurrent,
    /// Misses queue behind one in-flight round and reuse its outcome,
    /// success or failure.
    SingleFlight,
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Served from the TTL cache.
    Cache,
    /// Fetched upstream for this request.
    Upstream,
}

impl Origin {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Upstream => "upstream",
        }
    }
}

/// Snapshot returned to a caller.
#[derive(Debug, Clone)]
pub struct PriceLookup {
    /// The complete snapshot.
    pub snapshot: Arc<PriceSnapshot>,
    /// Whether it was cached or freshly fetched.
    pub origin: Origin,
}

/// Price service settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceServiceConfig {
    /// Behaviour of concurrent misses.
    pub refresh_mode: RefreshMode,
    /// Behaviour of sibling fetches after a failure.
    pub failure_policy: FailurePolicy,
}

/// Outcome of one refresh round, shared with callers queued behind it.
type RoundOutcome = Result<PriceLookup, AggregationError>;

/// Request orchestrator over the cache and the aggregator.
#[derive(Debug)]
pub struct PriceService {
    markets: MarketSpec,
    cache: Arc<TtlCache>,
    aggregator: FanOutAggregator,
    config: PriceServiceConfig,
    /// Held for the duration of a single-flight round; keeps its outcome.
    refresh_lock: tokio::sync::Mutex<Option<RoundOutcome>>,
    /// Single-flight rounds finished so far. Bumped while `refresh_lock` is held.
    completed_rounds: AtomicU64,
}

impl PriceService {
    /// Create a price service.
    #[must_use]
    pub fn new(
        markets: MarketSpec,
        cache: Arc<TtlCache>,
        aggregator: FanOutAggregator,
        config: PriceServiceConfig,
    ) -> Self {
        Self {
            markets,
            cache,
            aggregator,
            config,
            refresh_lock: tokio::sync::Mutex::new(None),
            completed_rounds: AtomicU64::new(0),
        }
    }

    /// Markets this service aggregates.
    #[must_use]
    pub const fn markets(&self) -> &MarketSpec {
        &self.markets
    }

    /// Cache backing this service.
    #[must_use]
    pub const fn cache(&self) -> &Arc<TtlCache> {
        &self.cache
    }

    /// Return the current price snapshot.
    ///
    /// # Errors
    ///
    /// Returns the aggregation error of a failed refresh. The cache is left
    /// unchanged in that case. In single-flight mode callers queued behind
    /// the failed round receive the same error.
    pub async fn prices(&self) -> Result<PriceLookup, AggregationError> {
        if let Some(lookup) = self.cached() {
            return Ok(lookup);
        }

        match self.config.refresh_mode {
            RefreshMode::Concurrent => self.refresh().await,
            RefreshMode::SingleFlight => self.refresh_single_flight().await,
        }
    }

    async fn refresh_single_flight(&self) -> RoundOutcome {
        let observed = self.completed_rounds.load(Ordering::Acquire);
        let mut last_round = self.refresh_lock.lock().await;

        // A round finished while we queued: share its outcome, errors included.
        if self.completed_rounds.load(Ordering::Acquire) != observed
            && let Some(outcome) = last_round.as_ref()
        {
            tracing::debug!(ok = outcome.is_ok(), "/prices | reusing in-flight round");
            return outcome.clone();
        }

        // A round may have published between the first check and the lock.
        if let Some(lookup) = self.cached() {
            return Ok(lookup);
        }

        let outcome = self.refresh().await;
        *last_round = Some(outcome.clone());
        self.completed_rounds.fetch_add(1, Ordering::Release);
        outcome
    }

    fn cached(&self) -> Option<PriceLookup> {
        let snapshot = self.cache.read()?;
        tracing::info!(markets = snapshot.len(), "/prices | CACHE HIT");
        metrics::record_cache_lookup(Origin::Cache);
        Some(PriceLookup {
            snapshot,
            origin: Origin::Cache,
        })
    }

    async fn refresh(&self) -> Result<PriceLookup, AggregationError> {
        tracing::info!(
            markets = self.markets.len(),
            "/prices | CACHE MISS | Fetching new data"
        );
        metrics::record_cache_lookup(Origin::Upstream);

        let started = Instant::now();
        let result = self
            .aggregator
            .aggregate_with_policy(&self.markets, self.config.failure_policy)
            .await;
        metrics::record_aggregation(started.elapsed(), result.is_ok());

        let snapshot = result?;
        let snapshot = self.cache.write(snapshot);

        tracing::debug!(
            markets = snapshot.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "Published fresh price snapshot"
        );

        Ok(PriceLookup {
            snapshot,
            origin: Origin::Upstream,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
