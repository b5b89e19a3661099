//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`FeedConnector`]: opens a transport session to the feed venue
//! - [`EventSink`]: receives decoded events from the broadcaster

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Sink, Stream};

use crate::domain::streaming::FeedEvent;

// =============================================================================
// Transport Port
// =============================================================================

/// Transport-level message, independent of the socket library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    /// Text frame.
    Text(String),
    /// Transport ping with payload.
    Ping(Vec<u8>),
    /// Transport pong with payload.
    Pong(Vec<u8>),
    /// Close frame with optional reason.
    Close(Option<String>),
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Opening the session failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Writing to the session failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading from the session failed.
    #[error("receive failed: {0}")]
    Receive(String),
}

/// Write half of a transport session.
pub type TransportSink = Pin<Box<dyn Sink<TransportMessage, Error = TransportError> + Send>>;

/// Read half of a transport session.
pub type TransportStream =
    Pin<Box<dyn Stream<Item = Result<TransportMessage, TransportError>> + Send>>;

/// Opens transport sessions to the feed venue.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Open a session to `url`, returning its write and read halves.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the session cannot be opened.
    async fn connect(&self, url: &str) -> Result<(TransportSink, TransportStream), TransportError>;
}

// =============================================================================
// Event Sink Port
// =============================================================================

/// Delivery failure reported by an [`EventSink`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink's queue is full; the event was dropped for this sink.
    #[error("sink queue is full")]
    Full,

    /// The sink is gone and will never accept events again.
    #[error("sink is closed")]
    Closed,

    /// The sink refused the event.
    #[error("sink rejected event: {0}")]
    Rejected(String),
}

/// Consumer of broadcast events (a push hub, a queue, a logger).
///
/// Implementations must not block: the broadcaster calls `deliver` inline on
/// the feed's receive path.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the event could not be accepted. A
    /// [`SinkError::Closed`] result unregisters the sink.
    fn deliver(&self, event: &FeedEvent) -> Result<(), SinkError>;
}

impl<F> EventSink for F
where
    F: Fn(&FeedEvent) -> Result<(), SinkError> + Send + Sync,
{
    fn deliver(&self, event: &FeedEvent) -> Result<(), SinkError> {
        self(event)
    }
}

/// Shared, type-erased sink.
pub type SharedEventSink = Arc<dyn EventSink>;
