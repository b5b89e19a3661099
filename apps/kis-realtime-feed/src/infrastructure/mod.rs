//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// KIS realtime WebSocket feed adapters.
pub mod kis;

/// Event fan-out to registered listeners.
pub mod broadcast;

/// Configuration loaded from the environment.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Bounded retry with a pre-retry hook.
pub mod resilience;

/// OpenTelemetry tracing integration.
pub mod telemetry;
