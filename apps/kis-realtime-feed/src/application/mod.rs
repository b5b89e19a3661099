//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the feed supervisor and the port interfaces
//! that define how the core interacts with transports and consumers.

/// Port interfaces for external systems (transport, event sinks).
pub mod ports;

/// Application services: the feed supervisor.
pub mod services;
