//! Domain Layer - Core market, price and cache types.
//!
//! This layer contains the market table, the price snapshot and the
//! snapshot cache. Nothing here performs I/O.

/// Market table and price snapshot types.
pub mod market;

/// Single-entry TTL cache for price snapshots.
pub mod cache;
