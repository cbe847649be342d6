//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `FanOutAggregator`: Concurrent per-market fetches, all-or-nothing
//! - `PriceService`: Cache-first request orchestration

mod aggregator;
mod prices;

pub use aggregator::{AggregationError, FailurePolicy, FanOutAggregator};
pub use prices::{Origin, PriceLookup, PriceService, PriceServiceConfig, RefreshMode};
