//! Domain Layer - Core feed types with no I/O.
//!
//! This layer contains the market data records the feed produces, the
//! caller identity a session runs for, and the subscription registry that
//! tracks which symbols are desired.

/// Caller identity for a feed session.
pub mod session;

/// Market data records, connection state and broadcast events.
pub mod streaming;

/// Symbol validation and the subscription registry.
pub mod subscription;
