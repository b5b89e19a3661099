//! Prometheus Metrics Module
//!
//! Exposes feed metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: Frames received by kind, decode failures
//! - **Events**: Events published by type, listener delivery failures
//! - **Connection**: Connection state, drops, reconnects, retries
//! - **Subscriptions**: Registry size by acknowledgement state
//! - **Data quality**: Fields that fell back to a default while decoding
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the existing handle.
///
/// # Errors
///
/// Returns [`BuildError`] if the recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

const FRAMES_RECEIVED: &str = "kis_feed_frames_received_total";
const DECODE_FAILURES: &str = "kis_feed_decode_failures_total";
const EVENTS_PUBLISHED: &str = "kis_feed_events_published_total";
const LISTENER_FAILURES: &str = "kis_feed_listener_failures_total";
const CONNECTION_STATE: &str = "kis_feed_connection_state";
const CONNECTION_LOST: &str = "kis_feed_connection_lost_total";
const RECONNECTS: &str = "kis_feed_reconnects_total";
const RETRIES: &str = "kis_feed_retries_total";
const SUBSCRIPTIONS: &str = "kis_feed_subscriptions";
const LISTENERS: &str = "kis_feed_listeners";
const PERMISSIVE_DEFAULTS: &str = "kis_feed_permissive_defaults_total";

fn register_metrics() {
    // Frames
    describe_counter!(FRAMES_RECEIVED, "Total decoded frames received from the feed");
    describe_counter!(DECODE_FAILURES, "Total frames that failed to decode");

    // Events
    describe_counter!(EVENTS_PUBLISHED, "Total events handed to the broadcaster");
    describe_counter!(LISTENER_FAILURES, "Total failed deliveries to listeners");
    describe_gauge!(LISTENERS, "Number of registered broadcast listeners");

    // Connection
    describe_gauge!(
        CONNECTION_STATE,
        "Feed connection state (0 disconnected, 1 connecting, 2 connected, 3 closing)"
    );
    describe_counter!(CONNECTION_LOST, "Total unexpected session drops by reason");
    describe_counter!(RECONNECTS, "Total sessions re-established after a drop");
    describe_counter!(RETRIES, "Total retried operations by name");

    // Subscriptions
    describe_gauge!(SUBSCRIPTIONS, "Registered symbols by acknowledgement state");

    // Data quality
    describe_counter!(
        PERMISSIVE_DEFAULTS,
        "Total unparsable fields replaced by a default while decoding"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a decoded frame by its label (`ticks`, `ping`, `ack`, ...).
pub fn record_frame(kind: &'static str) {
    counter!(FRAMES_RECEIVED, "kind" => kind).increment(1);
}

/// Record a frame that failed to decode.
pub fn record_decode_failure() {
    counter!(DECODE_FAILURES).increment(1);
}

/// Record an event handed to the broadcaster.
pub fn record_event_published(event_type: &'static str) {
    counter!(EVENTS_PUBLISHED, "event_type" => event_type).increment(1);
}

/// Record a failed delivery to a listener.
pub fn record_listener_failure(reason: &'static str) {
    counter!(LISTENER_FAILURES, "reason" => reason).increment(1);
}

/// Update the registered listener count.
#[allow(clippy::cast_precision_loss)]
pub fn set_listeners(count: usize) {
    gauge!(LISTENERS).set(count as f64);
}

/// Update the connection state gauge.
pub fn set_connection_state(state: ConnectionState) {
    gauge!(CONNECTION_STATE).set(state.as_gauge());
}

/// Record an unexpected session drop.
pub fn record_connection_lost(reason: &'static str) {
    counter!(CONNECTION_LOST, "reason" => reason).increment(1);
}

/// Record a session re-established after a drop.
pub fn record_reconnect() {
    counter!(RECONNECTS).increment(1);
}

/// Record one retry of a named operation.
pub fn record_retry(operation: &str) {
    counter!(RETRIES, "operation" => operation.to_string()).increment(1);
}

/// Update the subscription gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions(pending: usize, confirmed: usize) {
    gauge!(SUBSCRIPTIONS, "ack_state" => "pending").set(pending as f64);
    gauge!(SUBSCRIPTIONS, "ack_state" => "confirmed").set(confirmed as f64);
}

/// Record a field that was replaced by a default while decoding.
pub fn record_permissive_default(field: &'static str) {
    counter!(PERMISSIVE_DEFAULTS, "field" => field).increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame("ticks");
        record_decode_failure();
        record_retry("feed_send");
        set_subscriptions(1, 2);
        set_connection_state(ConnectionState::Connected);
        record_permissive_default("price");
    }

    #[test]
    fn metric_names_share_prefix() {
        for name in [
            FRAMES_RECEIVED,
            DECODE_FAILURES,
            EVENTS_PUBLISHED,
            LISTENER_FAILURES,
            CONNECTION_STATE,
            CONNECTION_LOST,
            RECONNECTS,
            RETRIES,
            SUBSCRIPTIONS,
            LISTENERS,
            PERMISSIVE_DEFAULTS,
        ] {
            assert!(name.starts_with("kis_feed_"), "{name}");
        }
    }
}
