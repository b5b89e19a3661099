//! Event Broadcaster
//!
//! Fans decoded feed events out to registered listeners.
//!
//! # Architecture
//!
//! Each listener pairs a [`ListenerFilter`] with an [`EventSink`]. Publishing
//! snapshots the matching listeners under a read lock and delivers outside
//! it, so a slow or failing sink never blocks registration.
//!
//! Delivery is best effort: an error or panic from one sink is logged and
//! counted and the remaining listeners still receive the event. A sink that
//! reports [`SinkError::Closed`] is unregistered.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::application::ports::{EventSink, SharedEventSink, SinkError};
use crate::domain::streaming::FeedEvent;
use crate::domain::subscription::Symbol;
use crate::infrastructure::metrics;

// =============================================================================
// Listener Types
// =============================================================================

/// Predicate used by [`ListenerFilter::Predicate`].
pub type EventPredicate = Arc<dyn Fn(&FeedEvent) -> bool + Send + Sync>;

/// Which events a listener receives.
#[derive(Clone, Default)]
pub enum ListenerFilter {
    /// Every event.
    #[default]
    All,
    /// Events for one instrument.
    Symbol(Symbol),
    /// Events accepted by a predicate.
    Predicate(EventPredicate),
}

impl ListenerFilter {
    /// Build a predicate filter.
    #[must_use]
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&FeedEvent) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Check if `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &FeedEvent) -> bool {
        match self {
            Self::All => true,
            Self::Symbol(symbol) => event.instrument() == symbol.as_str(),
            Self::Predicate(predicate) => predicate(event),
        }
    }
}

impl std::fmt::Debug for ListenerFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("All"),
            Self::Symbol(symbol) => f.debug_tuple("Symbol").field(symbol).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Registration handle returned by [`Broadcaster::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    /// Numeric listener id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

struct Listener {
    handle: ListenerHandle,
    filter: ListenerFilter,
    sink: SharedEventSink,
}

// =============================================================================
// Reports & Stats
// =============================================================================

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Listeners whose filter matched.
    pub matched: usize,
    /// Successful deliveries.
    pub delivered: usize,
    /// Failed listeners (delivery errors, delivery panics, filter panics).
    pub failed: usize,
    /// Listeners removed because their sink was closed.
    pub removed: usize,
}

/// Lifetime broadcaster counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    /// Events published.
    pub published: u64,
    /// Successful deliveries.
    pub delivered: u64,
    /// Failed deliveries.
    pub failed: u64,
}

// =============================================================================
// Broadcaster
// =============================================================================

/// Fan-out of feed events to registered listeners.
#[derive(Default)]
pub struct Broadcaster {
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Shared broadcaster.
pub type SharedBroadcaster = Arc<Broadcaster>;

impl Broadcaster {
    /// Create a broadcaster with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn register(&self, filter: ListenerFilter, sink: SharedEventSink) -> ListenerHandle {
        let handle = ListenerHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let count = {
            let mut listeners = self.listeners.write();
            listeners.push(Listener {
                handle,
                filter,
                sink,
            });
            listeners.len()
        };
        metrics::set_listeners(count);
        tracing::debug!(listener = handle.0, listeners = count, "Listener registered");
        handle
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unregister(&self, handle: ListenerHandle) -> bool {
        let (removed, count) = {
            let mut listeners = self.listeners.write();
            let before = listeners.len();
            listeners.retain(|l| l.handle != handle);
            (listeners.len() != before, listeners.len())
        };
        if removed {
            metrics::set_listeners(count);
            tracing::debug!(listener = handle.0, listeners = count, "Listener unregistered");
        }
        removed
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Lifetime counters.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Deliver `event` to every matching listener.
    ///
    /// Never fails: listener errors and panics are contained.
    pub fn publish(&self, event: &FeedEvent) -> PublishReport {
        let listeners: Vec<(ListenerHandle, ListenerFilter, SharedEventSink)> = self
            .listeners
            .read()
            .iter()
            .map(|l| (l.handle, l.filter.clone(), Arc::clone(&l.sink)))
            .collect();

        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_event_published(event.kind());

        let mut report = PublishReport::default();
        let mut closed = Vec::new();

        for (handle, filter, sink) in listeners {
            // A panicking filter counts as a failed listener.
            match catch_unwind(AssertUnwindSafe(|| filter.matches(event))) {
                Ok(true) => report.matched += 1,
                Ok(false) => continue,
                Err(_) => {
                    report.failed += 1;
                    metrics::record_listener_failure("panic");
                    tracing::error!(
                        listener = handle.0,
                        instrument = event.instrument(),
                        "Listener filter panicked"
                    );
                    continue;
                }
            }

            match catch_unwind(AssertUnwindSafe(|| sink.deliver(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(SinkError::Closed)) => {
                    report.failed += 1;
                    metrics::record_listener_failure("closed");
                    closed.push(handle);
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    metrics::record_listener_failure("rejected");
                    tracing::warn!(
                        listener = handle.0,
                        instrument = event.instrument(),
                        error = %e,
                        "Listener failed to accept event"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    metrics::record_listener_failure("panic");
                    tracing::error!(
                        listener = handle.0,
                        instrument = event.instrument(),
                        "Listener panicked during delivery"
                    );
                }
            }
        }

        for handle in closed {
            if self.unregister(handle) {
                report.removed += 1;
                tracing::info!(listener = handle.0, "Removed listener with closed sink");
            }
        }

        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
        report
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("listeners", &self.listener_count())
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Channel Sink
// =============================================================================

/// Sink backed by a bounded `tokio::mpsc` queue.
///
/// Uses `try_send`: a full queue drops the event for this listener instead of
/// blocking the feed.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<FeedEvent>,
}

impl ChannelSink {
    /// Create a sink and its receiving end.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FeedEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: &FeedEvent) -> Result<(), SinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
