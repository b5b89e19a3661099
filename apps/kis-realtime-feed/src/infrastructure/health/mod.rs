//! Operational HTTP Endpoint
//!
//! Exposes the feed supervisor's state to orchestrators and dashboards.
//!
//! # Routes
//!
//! - `GET /health` - Feed and broadcast status as JSON; 503 once stopped
//! - `GET /healthz` - Process liveness, always 200
//! - `GET /readyz` - 200 only while a feed session is connected
//! - `GET /subscriptions` - Registered symbols and their acknowledgement state
//! - `GET /metrics` - Prometheus exposition

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{FeedStatus, FeedSupervisor};
use crate::domain::streaming::ConnectionState;
use crate::domain::subscription::{AckState, Symbol};
use crate::infrastructure::broadcast::BroadcastStats;
use crate::infrastructure::metrics::get_metrics_handle;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// =============================================================================
// Response Bodies
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall verdict.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Seconds since the endpoint state was created.
    pub uptime_secs: u64,
    /// Report time.
    pub current_time: DateTime<Utc>,
    /// Supervisor snapshot.
    pub feed: FeedStatus,
    /// Broadcaster counters.
    pub broadcast: BroadcastStats,
}

/// Overall verdict derived from the supervisor snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Running with a live session.
    Healthy,
    /// Running, but the session is down or reconnecting.
    Degraded,
    /// Stopped.
    Unhealthy,
}

impl HealthStatus {
    /// Classify a supervisor snapshot.
    #[must_use]
    pub const fn of(feed: &FeedStatus) -> Self {
        match (feed.running, feed.connection_state) {
            (false, _) => Self::Unhealthy,
            (true, ConnectionState::Connected) => Self::Healthy,
            (true, _) => Self::Degraded,
        }
    }

    const fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// One entry of `GET /subscriptions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionEntry {
    /// Instrument code.
    pub symbol: Symbol,
    /// Whether the venue has acknowledged it since the last reconciliation.
    pub state: AckState,
}

// =============================================================================
// Server
// =============================================================================

/// State shared by the route handlers.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    supervisor: FeedSupervisor,
}

impl HealthServerState {
    /// Report on `supervisor`, tagging responses with `version`.
    #[must_use]
    pub fn new(version: String, supervisor: FeedSupervisor) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            supervisor,
        }
    }

    fn report(&self) -> HealthReport {
        let feed = self.supervisor.status();
        HealthReport {
            status: HealthStatus::of(&feed),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            broadcast: self.supervisor.broadcaster().stats(),
            feed,
        }
    }
}

/// HTTP server for the operational routes.
pub struct HealthServer {
    addr: SocketAddr,
    state: Arc<HealthServerState>,
    shutdown: CancellationToken,
}

impl HealthServer {
    /// Serve on every interface at `port` until `shutdown` fires.
    #[must_use]
    pub fn new(port: u16, state: Arc<HealthServerState>, shutdown: CancellationToken) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            state,
            shutdown,
        }
    }

    /// Bind and serve.
    ///
    /// # Errors
    ///
    /// Returns [`HealthServerError`] if the port cannot be bound or serving
    /// fails.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| HealthServerError::Bind {
                addr: self.addr,
                source,
            })?;
        tracing::info!(addr = %self.addr, "Health endpoint listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.shutdown.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!("Health endpoint stopped");
        Ok(())
    }
}

/// Routes over `state`, without binding.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(ready))
        .route("/subscriptions", get(subscriptions))
        .route("/metrics", get(prometheus))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn health(State(state): State<Arc<HealthServerState>>) -> Response {
    let report = state.report();
    (report.status.http_status(), Json(report)).into_response()
}

async fn ready(State(state): State<Arc<HealthServerState>>) -> Response {
    match state.supervisor.connection_state() {
        ConnectionState::Connected => (StatusCode::OK, "READY").into_response(),
        other => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("NOT READY ({other})"),
        )
            .into_response(),
    }
}

async fn subscriptions(State(state): State<Arc<HealthServerState>>) -> Json<Vec<SubscriptionEntry>> {
    Json(
        state
            .supervisor
            .subscriptions()
            .into_iter()
            .map(|(symbol, state)| SubscriptionEntry { symbol, state })
            .collect(),
    )
}

async fn prometheus() -> Response {
    let Some(handle) = get_metrics_handle() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render()).into_response()
}

/// Health endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The listen address could not be bound.
    #[error("failed to bind health endpoint on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an error.
    #[error("health endpoint failed: {0}")]
    Serve(#[source] std::io::Error),
}
