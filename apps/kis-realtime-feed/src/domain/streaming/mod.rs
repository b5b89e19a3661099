//! Streaming Domain Types
//!
//! Typed records decoded from the realtime feed and the events carried by
//! the broadcaster. All records are immutable once constructed.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::Serialize;

use super::subscription::Symbol;

// =============================================================================
// Price Direction
// =============================================================================

/// Direction of a price change relative to the previous close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Price rose (including limit-up).
    Rise,
    /// Price fell (including limit-down).
    Fall,
    /// No change, or an unrecognised sign code.
    Unchanged,
}

impl ChangeType {
    /// Get the change type name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Rise => "rise",
            Self::Fall => "fall",
            Self::Unchanged => "unchanged",
        }
    }
}

// =============================================================================
// Tick Record
// =============================================================================

/// One trade tick for a single instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickRecord {
    /// Instrument code.
    pub symbol: Symbol,
    /// Last traded price.
    pub price: Decimal,
    /// Absolute change against the previous close.
    pub price_change: Decimal,
    /// Direction of the change.
    pub change_type: ChangeType,
    /// Change rate in percent.
    pub change_rate: Decimal,
    /// Volume of this trade, clamped to the `i32` range.
    pub volume: i32,
    /// Cumulative volume for the session.
    pub total_volume: i64,
    /// Session open price.
    pub open_price: Decimal,
    /// Session high price.
    pub high_price: Decimal,
    /// Session low price.
    pub low_price: Decimal,
    /// Best ask price at the time of the tick.
    pub best_ask: Decimal,
    /// Best bid price at the time of the tick.
    pub best_bid: Decimal,
    /// Trade time, re-based onto the current local date.
    pub trade_time: NaiveDateTime,
}

// =============================================================================
// Execution Notice
// =============================================================================

/// Fill notification for one of the session owner's own orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionNotice {
    /// Venue order number.
    pub order_id: String,
    /// Instrument code as sent by the venue.
    pub instrument: String,
    /// Ordered quantity.
    pub ordered_quantity: i64,
    /// Filled quantity.
    pub filled_quantity: i64,
    /// Fill price.
    pub fill_price: Decimal,
    /// Order limit price.
    pub order_price: Decimal,
    /// Venue processing status label.
    pub status: String,
    /// Fill time, re-based onto the current local date.
    pub fill_time: NaiveDateTime,
}

// =============================================================================
// Feed Events
// =============================================================================

/// Event fanned out to broadcast listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// A decoded trade tick.
    Tick(TickRecord),
    /// A decoded order execution notice.
    Execution(ExecutionNotice),
}

impl FeedEvent {
    /// Instrument the event refers to.
    #[must_use]
    pub fn instrument(&self) -> &str {
        match self {
            Self::Tick(tick) => tick.symbol.as_str(),
            Self::Execution(notice) => &notice.instrument,
        }
    }

    /// Short label used for logging and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Tick(_) => "tick",
            Self::Execution(_) => "execution",
        }
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Socket open and receive loop running.
    Connected,
    /// Explicit disconnect in progress.
    Closing,
}

impl ConnectionState {
    /// Check if the connection is usable for sending.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }

    /// Numeric encoding for the connection-state gauge.
    #[must_use]
    pub const fn as_gauge(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Closing => 3.0,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
