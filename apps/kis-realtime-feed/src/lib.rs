#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! KIS Realtime Feed - Market Data Stream Core
//!
//! Maintains a single WebSocket session to the Korea Investment & Securities
//! realtime feed, keeps the desired symbol subscriptions in sync with the
//! venue across reconnects, and fans decoded events out to listeners.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core feed types with no I/O
//!   - `streaming`: Tick records, execution notices, connection state
//!   - `subscription`: Symbol validation and the subscription registry
//!   - `session`: Caller identity for a feed session
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport connector and event sink interfaces
//!   - `services`: The feed supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kis`: Wire codec, WebSocket transport, feed connection
//!   - `resilience`: Bounded retry with a pre-retry hook
//!   - `broadcast`: Listener fan-out
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! KIS WebSocket ──► FeedConnection ──► FrameDecoder ──► FeedSupervisor
//!                        ▲                                   │
//!                        │ subscribe / heartbeat ack         ▼
//!                        └──────────────────────────── Broadcaster ──► sinks
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core feed types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::session::{CustomerType, FeedPrincipal};
pub use domain::streaming::{ChangeType, ConnectionState, ExecutionNotice, FeedEvent, TickRecord};
pub use domain::subscription::{
    AckState, DesiredState, RegistryStats, SubscriptionRegistry, SubscriptionRequest, Symbol,
    SymbolError,
};

// Ports
pub use application::ports::{
    EventSink, FeedConnector, SharedEventSink, SinkError, TransportError, TransportMessage,
};

// Supervisor
pub use application::services::{FeedError, FeedStatus, FeedSupervisor, FeedSupervisorConfig};

// Feed adapters
pub use infrastructure::kis::{
    ConnectOutcome, ConnectionError, DecodedFrame, FeedCommand, FeedConnection,
    FeedConnectionConfig, FeedHandler, FrameDecoder, LivenessConfig, MessageTypes, SessionAuth,
    WebSocketConnector, is_retryable_connection_error,
};

// Retry
pub use infrastructure::resilience::{RetryError, RetryPolicy};

// Broadcast
pub use infrastructure::broadcast::{
    Broadcaster, ChannelSink, ListenerFilter, ListenerHandle, PublishReport, SharedBroadcaster,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, FeedConfig, KisEnvironment};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
