//! Configuration Module
//!
//! Configuration loading for the realtime feed service.

mod settings;

pub use settings::{ConfigError, ConnectionSettings, FeedConfig, KisEnvironment};
