//! Price Snapshot TTL Cache
//!
//! Holds the most recent complete [`PriceSnapshot`] together with the instant
//! its fetch completed, and serves it while it is younger than a fixed
//! freshness window.
//!
//! # Design
//!
//! - Exactly one entry; a write replaces it whole.
//! - A single lock guards the entry and is held only for the check-and-clone
//!   or the replace. It is never held across an upstream fetch, so two
//!   concurrent misses may both refresh and the last writer wins.
//! - Snapshots are handed out as `Arc`s and never mutated after publication.
//! - Time comes from an injected [`Clock`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::domain::market::PriceSnapshot;

/// Freshness window used when none is configured.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(10);

// =============================================================================
// Clock
// =============================================================================

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.elapsed.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.elapsed.lock()
    }
}

// =============================================================================
// TTL Cache
// =============================================================================

#[derive(Debug)]
struct CacheEntry {
    snapshot: Arc<PriceSnapshot>,
    fetched_at: Instant,
}

/// Single-entry cache with a fixed freshness window.
pub struct TtlCache {
    freshness: Duration,
    clock: Arc<dyn Clock>,
    entry: Mutex<Option<CacheEntry>>,
}

impl TtlCache {
    /// Create a cache driven by the system clock.
    #[must_use]
    pub fn new(freshness: Duration) -> Self {
        Self::with_clock(freshness, Arc::new(SystemClock))
    }

    /// Create a cache driven by `clock`.
    #[must_use]
    pub fn with_clock(freshness: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            freshness,
            clock,
            entry: Mutex::new(None),
        }
    }

    /// Configured freshness window.
    #[must_use]
    pub const fn freshness_window(&self) -> Duration {
        self.freshness
    }

    /// Return the cached snapshot if one exists and is still fresh.
    #[must_use]
    pub fn read(&self) -> Option<Arc<PriceSnapshot>> {
        let now = self.clock.now();
        let entry = self.entry.lock();

        entry
            .as_ref()
            .filter(|e| now.saturating_duration_since(e.fetched_at) < self.freshness)
            .map(|e| Arc::clone(&e.snapshot))
    }

    /// Replace the cached entry, stamping it with the current instant.
    ///
    /// Returns the published snapshot.
    pub fn write(&self, snapshot: PriceSnapshot) -> Arc<PriceSnapshot> {
        let snapshot = Arc::new(snapshot);
        let fetched_at = self.clock.now();

        *self.entry.lock() = Some(CacheEntry {
            snapshot: Arc::clone(&snapshot),
            fetched_at,
        });

        snapshot
    }

    /// Age of the current entry, fresh or not.
    #[must_use]
    pub fn age(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.entry
            .lock()
            .as_ref()
            .map(|e| now.saturating_duration_since(e.fetched_at))
    }

    /// Whether an entry exists and is still fresh.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.age().is_some_and(|age| age < self.freshness)
    }
}

impl std::fmt::Debug for TtlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("freshness", &self.freshness)
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::MarketSpec;
    use proptest::prelude::*;

    fn snapshot(eth: f64, bnb: f64) -> PriceSnapshot {
        let spec = MarketSpec::new([("eth", "ETHUSDC"), ("bnb", "BNBUSDC")]).unwrap();
        PriceSnapshot::assemble(&spec, vec![Some(eth), Some(bnb)]).unwrap()
    }

    fn cache_with_clock() -> (TtlCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = TtlCache::with_clock(DEFAULT_FRESHNESS_WINDOW, clock.clone());
        (cache, clock)
    }

    #[test]
    fn empty_cache_misses() {
        let (cache, _) = cache_with_clock();
        assert!(cache.read().is_none());
        assert!(cache.age().is_none());
        assert!(!cache.is_fresh());
    }

    #[test]
    fn read_within_window_hits() {
        let (cache, clock) = cache_with_clock();
        cache.write(snapshot(3400.5, 600.25));

        clock.advance(Duration::from_millis(9_999));
        let hit = cache.read().unwrap();
        assert_eq!(*hit, snapshot(3400.5, 600.25));
    }

    #[test]
    fn read_at_window_boundary_misses() {
        let (cache, clock) = cache_with_clock();
        cache.write(snapshot(3400.5, 600.25));

        clock.advance(DEFAULT_FRESHNESS_WINDOW);
        assert!(cache.read().is_none());
        assert_eq!(cache.age(), Some(DEFAULT_FRESHNESS_WINDOW));
    }

    #[test]
    fn write_replaces_and_restamps() {
        let (cache, clock) = cache_with_clock();
        cache.write(snapshot(1.0, 2.0));
        clock.advance(Duration::from_secs(8));
        cache.write(snapshot(3.0, 4.0));
        clock.advance(Duration::from_secs(8));

        let hit = cache.read().unwrap();
        assert_eq!(hit.get("eth"), Some(3.0));
        assert_eq!(cache.age(), Some(Duration::from_secs(8)));
    }

    #[test]
    fn back_to_back_reads_share_snapshot() {
        let (cache, _) = cache_with_clock();
        let published = cache.write(snapshot(3400.5, 600.25));

        let first = cache.read().unwrap();
        let second = cache.read().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &published));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let first = clock.now();
        assert!(clock.now() >= first);
    }

    proptest! {
        #[test]
        fn reads_inside_window_return_written_bytes(
            eth in 0.0f64..1_000_000.0,
            bnb in 0.0f64..1_000_000.0,
            steps in prop::collection::vec(0u64..1_000, 1..10),
        ) {
            let (cache, clock) = cache_with_clock();
            let written = snapshot(eth, bnb);
            let expected = serde_json::to_vec(&written).unwrap();
            cache.write(written);

            let mut elapsed = 0u64;
            for step in steps {
                elapsed += step;
                clock.advance(Duration::from_millis(step));
                let hit = cache.read();
                if elapsed < 10_000 {
                    let hit = hit.unwrap();
                    prop_assert_eq!(serde_json::to_vec(&*hit).unwrap(), expected.clone());
                } else {
                    prop_assert!(hit.is_none());
                }
            }
        }

        #[test]
        fn reads_after_window_miss(extra in 0u64..100_000) {
            let (cache, clock) = cache_with_clock();
            cache.write(snapshot(1.0, 2.0));
            clock.advance(DEFAULT_FRESHNESS_WINDOW + Duration::from_millis(extra));
            prop_assert!(cache.read().is_none());
        }
    }
}
