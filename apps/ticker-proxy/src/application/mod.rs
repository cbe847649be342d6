//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with upstream ticker APIs.

/// Port interfaces for external systems (price sources).
pub mod ports;

/// Application services for aggregation and request orchestration.
pub mod services;
