//! Fan-Out Aggregator
//!
//! Fetches every market of a [`MarketSpec`] concurrently and assembles a
//! complete [`PriceSnapshot`], or fails on the first per-market error.
//!
//! # Protocol
//!
//! ```text
//!               ┌─► task(eth) ─┐
//! aggregate() ──┼─► task(bnb) ─┼──► mpsc(len) ──► collect ──► snapshot
//!               └─► task(...) ─┘
//! ```
//!
//! The result channel holds one slot per market so producers never block.
//! Collection stops at the first error. In [`FailurePolicy::LetFinish`]
//! the remaining fetches keep running and their results are dropped; in
//! [`FailurePolicy::CancelStragglers`] they are cancelled.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{PriceSource, PriceSourceError};
use crate::domain::market::{MarketId, MarketSpec, PriceSnapshot};
use crate::infrastructure::metrics;

/// What happens to in-flight fetches once one market has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Leave sibling fetches running and discard their results.
    #[default]
    LetFinish,
    /// Cancel sibling fetches as soon as the round fails.
    CancelStragglers,
}

/// Aggregation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    /// A market lookup failed; the whole round is abandoned.
    #[error("failed to fetch {symbol} ({market}): {source}")]
    MarketFailed {
        /// Symbol key of the failing market.
        symbol: String,
        /// Upstream market identifier.
        market: String,
        /// Underlying price source error.
        source: PriceSourceError,
    },

    /// Fetch tasks ended without delivering every result.
    #[error("aggregation incomplete: received {received} of {expected} prices")]
    Incomplete {
        /// Results received.
        received: usize,
        /// Results expected.
        expected: usize,
    },

    /// The caller cancelled the round.
    #[error("aggregation cancelled")]
    Cancelled,
}

/// One per-market outcome, tagged with its position in the market table.
#[derive(Debug)]
struct FetchResult {
    index: usize,
    result: Result<f64, PriceSourceError>,
}

/// Concurrent fan-out over a [`PriceSource`].
#[derive(Clone)]
pub struct FanOutAggregator {
    source: Arc<dyn PriceSource>,
}

impl FanOutAggregator {
    /// Create an aggregator over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn PriceSource>) -> Self {
        Self { source }
    }

    /// Fetch every market and return a complete snapshot.
    ///
    /// Sibling fetches are not cancelled when one fails.
    ///
    /// # Errors
    ///
    /// Returns the first per-market failure, or `Incomplete` if a fetch
    /// task died without reporting.
    pub async fn aggregate(&self, spec: &MarketSpec) -> Result<PriceSnapshot, AggregationError> {
        let mut rx = self.spawn_fetches(spec, None);
        collect(spec, &mut rx).await
    }

    /// Like [`aggregate`](Self::aggregate), but cancels in-flight fetches on
    /// the first failure and aborts when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the first per-market failure, `Cancelled` if `cancel` fires
    /// first, or `Incomplete` if a fetch task died without reporting.
    pub async fn aggregate_with_cancel(
        &self,
        spec: &MarketSpec,
        cancel: CancellationToken,
    ) -> Result<PriceSnapshot, AggregationError> {
        let round = cancel.child_token();
        let _stop_stragglers = round.clone().drop_guard();
        let mut rx = self.spawn_fetches(spec, Some(round));

        tokio::select! {
            () = cancel.cancelled() => Err(AggregationError::Cancelled),
            result = collect(spec, &mut rx) => result,
        }
    }

    /// Run one round under `policy`.
    ///
    /// # Errors
    ///
    /// See [`aggregate`](Self::aggregate) and
    /// [`aggregate_with_cancel`](Self::aggregate_with_cancel).
    pub async fn aggregate_with_policy(
        &self,
        spec: &MarketSpec,
        policy: FailurePolicy,
    ) -> Result<PriceSnapshot, AggregationError> {
        match policy {
            FailurePolicy::LetFinish => self.aggregate(spec).await,
            FailurePolicy::CancelStragglers => {
                self.aggregate_with_cancel(spec, CancellationToken::new())
                    .await
            }
        }
    }

    fn spawn_fetches(
        &self,
        spec: &MarketSpec,
        cancel: Option<CancellationToken>,
    ) -> mpsc::Receiver<FetchResult> {
        let (tx, rx) = mpsc::channel(spec.len().max(1));

        for (index, entry) in spec.iter().enumerate() {
            let tx = tx.clone();
            let source = Arc::clone(&self.source);
            let market = entry.market.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                let result = match cancel {
                    Some(token) => {
                        tokio::select! {
                            () = token.cancelled() => return,
                            result = fetch_one(source.as_ref(), &market) => result,
                        }
                    }
                    None => fetch_one(source.as_ref(), &market).await,
                };

                // The collector may already have returned; late results are dropped.
                let _ = tx.send(FetchResult { index, result }).await;
            });
        }

        rx
    }
}

impl std::fmt::Debug for FanOutAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutAggregator").finish_non_exhaustive()
    }
}

async fn fetch_one(source: &dyn PriceSource, market: &MarketId) -> Result<f64, PriceSourceError> {
    let started = Instant::now();
    let result = source.fetch(market).await;
    metrics::record_upstream_fetch(started.elapsed(), result.as_ref().err());
    result
}

async fn collect(
    spec: &MarketSpec,
    rx: &mut mpsc::Receiver<FetchResult>,
) -> Result<PriceSnapshot, AggregationError> {
    let expected = spec.len();
    let mut prices: Vec<Option<f64>> = vec![None; expected];

    for received in 0..expected {
        let Some(FetchResult { index, result }) = rx.recv().await else {
            return Err(AggregationError::Incomplete { received, expected });
        };

        match result {
            Ok(price) => prices[index] = Some(price),
            Err(source) => {
                let (symbol, market) = spec.get(index).map_or_else(
                    || (String::new(), String::new()),
                    |e| (e.symbol.to_string(), e.market.to_string()),
                );
                tracing::warn!(
                    symbol = %symbol,
                    market = %market,
                    error = %source,
                    "Market fetch failed, abandoning round"
                );
                return Err(AggregationError::MarketFailed {
                    symbol,
                    market,
                    source,
                });
            }
        }
    }

    PriceSnapshot::assemble(spec, prices).ok_or(AggregationError::Incomplete {
        received: expected,
        expected,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use test_case::test_case;

    use super::*;
    use crate::application::ports::MockPriceSource;

    fn spec() -> MarketSpec {
        MarketSpec::new([("eth", "ETHUSDC"), ("bnb", "BNBUSDC"), ("ban", "BANANOUSDT")]).unwrap()
    }

    fn malformed(market: &str) -> PriceSourceError {
        PriceSourceError::Malformed {
            market: market.to_string(),
            message: "invalid float literal".to_string(),
        }
    }

    fn price_for(market: &str) -> f64 {
        match market {
            "ETHUSDC" => 3400.5,
            "BNBUSDC" => 600.25,
            _ => 0.0042,
        }
    }

    #[tokio::test]
    async fn all_markets_resolve() {
        let mut source = MockPriceSource::new();
        source
            .expect_fetch()
            .times(3)
            .returning(|market| Ok(price_for(market.as_str())));

        let aggregator = FanOutAggregator::new(Arc::new(source));
        let snapshot = aggregator.aggregate(&spec()).await.unwrap();

        assert!(snapshot.covers(&spec()));
        assert_eq!(snapshot.get("eth"), Some(3400.5));
        assert_eq!(snapshot.get("bnb"), Some(600.25));
        assert_eq!(snapshot.get("ban"), Some(0.0042));
    }

    #[tokio::test]
    async fn empty_spec_yields_empty_snapshot() {
        let aggregator = FanOutAggregator::new(Arc::new(MockPriceSource::new()));
        let empty = MarketSpec::new(Vec::<(&str, &str)>::new()).unwrap();

        let snapshot = aggregator.aggregate(&empty).await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[test_case("ETHUSDC", "eth" ; "first market fails")]
    #[test_case("BNBUSDC", "bnb" ; "middle market fails")]
    #[test_case("BANANOUSDT", "ban" ; "last market fails")]
    #[tokio::test]
    async fn any_single_failure_fails_the_round(failing: &'static str, symbol: &str) {
        let mut source = MockPriceSource::new();
        source.expect_fetch().returning(move |market| {
            if market.as_str() == failing {
                Err(malformed(failing))
            } else {
                Ok(price_for(market.as_str()))
            }
        });

        let aggregator = FanOutAggregator::new(Arc::new(source));
        let err = aggregator.aggregate(&spec()).await.unwrap_err();

        assert_eq!(
            err,
            AggregationError::MarketFailed {
                symbol: symbol.to_string(),
                market: failing.to_string(),
                source: malformed(failing),
            }
        );
    }

    #[tokio::test]
    async fn error_text_carries_upstream_cause() {
        let mut source = MockPriceSource::new();
        source.expect_fetch().returning(|market| {
            Err(PriceSourceError::Unreachable {
                market: market.to_string(),
                message: "connection refused".to_string(),
            })
        });

        let aggregator = FanOutAggregator::new(Arc::new(source));
        let one = MarketSpec::new([("eth", "ETHUSDC")]).unwrap();
        let err = aggregator.aggregate(&one).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "failed to fetch eth (ETHUSDC): upstream unreachable for ETHUSDC: connection refused"
        );
    }

    /// Source whose `BNBUSDC` lookup fails immediately while the rest stall.
    struct SlowSiblings {
        completed: Arc<AtomicUsize>,
        delay: Duration,
    }

    #[async_trait]
    impl PriceSource for SlowSiblings {
        async fn fetch(&self, market: &MarketId) -> Result<f64, PriceSourceError> {
            if market.as_str() == "BNBUSDC" {
                return Err(malformed("BNBUSDC"));
            }
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(1.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_does_not_wait_for_stragglers() {
        let completed = Arc::new(AtomicUsize::new(0));
        let aggregator = FanOutAggregator::new(Arc::new(SlowSiblings {
            completed: Arc::clone(&completed),
            delay: Duration::from_secs(30),
        }));

        let err = aggregator.aggregate(&spec()).await.unwrap_err();
        assert!(matches!(err, AggregationError::MarketFailed { .. }));
        assert_eq!(completed.load(Ordering::SeqCst), 0);

        // Stragglers still run to completion in the default policy.
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_policy_stops_stragglers() {
        let completed = Arc::new(AtomicUsize::new(0));
        let aggregator = FanOutAggregator::new(Arc::new(SlowSiblings {
            completed: Arc::clone(&completed),
            delay: Duration::from_secs(30),
        }));

        let err = aggregator
            .aggregate_with_policy(&spec(), FailurePolicy::CancelStragglers)
            .await
            .unwrap_err();
        assert!(matches!(err, AggregationError::MarketFailed { .. }));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_cancellation_aborts_round() {
        let completed = Arc::new(AtomicUsize::new(0));
        let aggregator = FanOutAggregator::new(Arc::new(SlowSiblings {
            completed: Arc::clone(&completed),
            delay: Duration::from_secs(30),
        }));
        let only_slow = MarketSpec::new([("eth", "ETHUSDC")]).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = aggregator
            .aggregate_with_cancel(&only_slow, cancel)
            .await
            .unwrap_err();
        assert_eq!(err, AggregationError::Cancelled);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 0);
    }

    /// Source that panics, dropping its result sender.
    struct Panicking;

    #[async_trait]
    impl PriceSource for Panicking {
        async fn fetch(&self, _market: &MarketId) -> Result<f64, PriceSourceError> {
            panic!("upstream adapter bug");
        }
    }

    #[tokio::test]
    async fn dead_task_reports_incomplete() {
        let aggregator = FanOutAggregator::new(Arc::new(Panicking));
        let err = aggregator.aggregate(&spec()).await.unwrap_err();

        assert_eq!(
            err,
            AggregationError::Incomplete {
                received: 0,
                expected: 3,
            }
        );
    }
}
