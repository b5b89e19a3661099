//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `FeedSupervisor`: Owns the feed session and subscription registry,
//!   routes decoded events to the broadcaster

mod feed_supervisor;

pub use feed_supervisor::{FeedError, FeedStatus, FeedSupervisor, FeedSupervisorConfig};
