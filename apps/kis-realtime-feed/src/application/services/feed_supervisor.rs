//! Feed Supervisor
//!
//! Orchestrates the feed connection, the subscription registry and the
//! broadcaster.
//!
//! - Every transition into `Connected` replays the whole registry
//!   (reconciliation). The venue keeps no subscription state across a dropped
//!   connection, so this is a full-state replay rather than a diff.
//! - Subscribe/unsubscribe update the registry first and only talk to the
//!   venue while connected; reconciliation covers the rest.
//! - An unexpected drop spawns one recovery task that reconnects and
//!   reconciles under the recovery retry policy. Drops reported while it runs
//!   are folded into it. A session only counts as recovered once it has
//!   stayed up for one retry delay, so a venue that accepts and immediately
//!   drops sessions exhausts the policy instead of being hammered. Stop
//!   cancels it.
//! - Events are published only while the publish gate is open. `stop` closes
//!   the gate under its write lock, so nothing is published after it returns.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::domain::session::FeedPrincipal;
use crate::domain::streaming::{ConnectionState, FeedEvent};
use crate::domain::subscription::{AckState, Symbol, SubscriptionRegistry, SymbolError};
use crate::infrastructure::broadcast::SharedBroadcaster;
use crate::infrastructure::kis::{
    AuthError, ConnectOutcome, ConnectionError, ControlAck, ControlFrame, DecodedFrame,
    FeedCommand, FeedConnection, FeedHandler, MessageTypes, SessionAuth,
    is_retryable_connection_error,
};
use crate::infrastructure::metrics;
use crate::infrastructure::resilience::{RetryError, RetryPolicy};

// =============================================================================
// Error Type
// =============================================================================

/// Errors surfaced to supervisor callers.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The principal carries no usable feed approval key.
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    /// The symbol failed validation.
    #[error(transparent)]
    InvalidSymbol(#[from] SymbolError),

    /// Opening the feed failed.
    #[error("feed connection failed: {0}")]
    Connection(#[from] ConnectionError),

    /// A command could not be delivered, after retries.
    #[error("feed command failed: {0}")]
    Command(#[source] Box<RetryError<ConnectionError>>),
}

// =============================================================================
// Configuration & Status
// =============================================================================

/// Supervisor configuration.
#[derive(Debug, Clone, Default)]
pub struct FeedSupervisorConfig {
    /// Retry policy for subscribe/unsubscribe sends.
    pub send_retry: RetryPolicy,
    /// Retry policy for reconnecting after a drop. Its delay also paces the
    /// first attempt and the settle check.
    pub recovery_retry: RetryPolicy,
    /// Transaction codes to subscribe with.
    pub message_types: MessageTypes,
}

/// Point-in-time supervisor snapshot for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    /// Whether `start` has been called without a matching `stop`.
    pub running: bool,
    /// Connection state.
    pub connection_state: ConnectionState,
    /// Registered symbols.
    pub subscriptions: usize,
    /// Symbols acknowledged by the venue since the last reconciliation.
    pub confirmed_subscriptions: usize,
    /// Registered broadcast listeners.
    pub listeners: usize,
    /// Sessions re-established after a drop.
    pub reconnects: u64,
    /// Frames decoded since creation.
    pub frames_received: u64,
}

// =============================================================================
// Supervisor
// =============================================================================

struct SessionContext {
    auth: SessionAuth,
    hts_id: Option<String>,
    demo: bool,
}

struct RecoveryTask {
    id: u64,
    cancel: CancellationToken,
}

struct SupervisorInner {
    connection: FeedConnection,
    registry: SubscriptionRegistry,
    broadcaster: SharedBroadcaster,
    config: FeedSupervisorConfig,
    session: RwLock<Option<SessionContext>>,
    running: AtomicBool,
    /// Set by a drop, cleared by the next established session.
    lost: AtomicBool,
    publish_gate: tokio::sync::RwLock<bool>,
    recovery: Mutex<Option<RecoveryTask>>,
    recovery_ids: AtomicU64,
    reconnects: AtomicU64,
    frames_received: AtomicU64,
}

/// Supervisor for one feed session and its subscriptions.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct FeedSupervisor {
    inner: Arc<SupervisorInner>,
}

impl FeedSupervisor {
    /// Create a stopped supervisor.
    #[must_use]
    pub fn new(
        connection: FeedConnection,
        broadcaster: SharedBroadcaster,
        config: FeedSupervisorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                connection,
                registry: SubscriptionRegistry::new(),
                broadcaster,
                config,
                session: RwLock::new(None),
                running: AtomicBool::new(false),
                lost: AtomicBool::new(false),
                publish_gate: tokio::sync::RwLock::new(false),
                recovery: Mutex::new(None),
                recovery_ids: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
                frames_received: AtomicU64::new(0),
            }),
        }
    }

    /// Start the feed for `principal` and replay the registry.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Unauthorized`] if the principal has no approval
    /// key, or [`FeedError::Connection`] if the feed cannot be opened.
    pub async fn start(&self, principal: &FeedPrincipal) -> Result<(), FeedError> {
        let auth = SessionAuth::from_principal(principal)?;
        tracing::info!(
            user_id = %principal.user_id,
            auth = %auth,
            demo = principal.demo,
            "Starting realtime feed"
        );

        *self.inner.session.write() = Some(SessionContext {
            auth,
            hts_id: principal.hts_id.clone(),
            demo: principal.demo,
        });
        self.inner.running.store(true, Ordering::SeqCst);
        *self.inner.publish_gate.write().await = true;

        if let Err(e) = self.inner.ensure_connected().await {
            tracing::error!(error = %e, "Failed to start realtime feed");
            self.inner.halt().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Add a symbol. Returns `false` if it was already registered.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidSymbol`] for a malformed symbol, or
    /// [`FeedError::Command`] if the subscribe command could not be sent.
    pub async fn subscribe(&self, raw: &str) -> Result<bool, FeedError> {
        let symbol = Symbol::parse(raw)?;
        if !self.inner.registry.add_symbol(symbol.clone()) {
            tracing::debug!(%symbol, "Symbol already subscribed");
            return Ok(false);
        }
        self.inner.publish_subscription_gauges();
        tracing::info!(%symbol, "Symbol subscribed");

        if self.inner.connection.is_connected() {
            let command = FeedCommand::subscribe(&self.inner.config.message_types.tick, &symbol);
            self.inner.send_with_retry(&command).await?;
        }
        Ok(true)
    }

    /// Remove a symbol. Returns `false` if it was not registered.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidSymbol`] for a malformed symbol, or
    /// [`FeedError::Command`] if the unsubscribe command could not be sent.
    pub async fn unsubscribe(&self, raw: &str) -> Result<bool, FeedError> {
        let symbol = Symbol::parse(raw)?;
        if !self.inner.registry.remove(&symbol) {
            tracing::debug!(%symbol, "Symbol not subscribed");
            return Ok(false);
        }
        self.inner.publish_subscription_gauges();
        tracing::info!(%symbol, "Symbol unsubscribed");

        if self.inner.connection.is_connected() {
            let command =
                FeedCommand::unsubscribe(&self.inner.config.message_types.tick, &symbol);
            self.inner.send_with_retry(&command).await?;
        }
        Ok(true)
    }

    /// Stop the feed. The registry is kept so a later `start` resumes the
    /// same symbols.
    pub async fn stop(&self) {
        tracing::info!("Stopping realtime feed");
        self.inner.halt().await;
    }

    /// Snapshot of the registered symbols.
    #[must_use]
    pub fn subscribed_symbols(&self) -> Vec<Symbol> {
        self.inner.registry.list()
    }

    /// Registered symbols with their venue acknowledgement state.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<(Symbol, AckState)> {
        self.inner
            .registry
            .list()
            .into_iter()
            .filter_map(|symbol| {
                let state = self.inner.registry.ack_state(&symbol)?;
                Some((symbol, state))
            })
            .collect()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Check if the supervisor is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Status snapshot.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        let stats = self.inner.registry.stats();
        FeedStatus {
            running: self.is_running(),
            connection_state: self.connection_state(),
            subscriptions: stats.total(),
            confirmed_subscriptions: stats.confirmed,
            listeners: self.inner.broadcaster.listener_count(),
            reconnects: self.inner.reconnects.load(Ordering::Relaxed),
            frames_received: self.inner.frames_received.load(Ordering::Relaxed),
        }
    }

    /// The broadcaster events are published to.
    #[must_use]
    pub fn broadcaster(&self) -> &SharedBroadcaster {
        &self.inner.broadcaster
    }
}

impl std::fmt::Debug for FeedSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSupervisor")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SupervisorInner {
    /// Close the publish gate, cancel recovery and drop the session.
    async fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        *self.publish_gate.write().await = false;

        if let Some(task) = self.recovery.lock().take() {
            task.cancel.cancel();
        }
        self.connection.disconnect().await;
        self.lost.store(false, Ordering::SeqCst);
    }

    /// Connect if needed; reconcile when a new session was opened.
    async fn ensure_connected(self: &Arc<Self>) -> Result<(), ConnectionError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ConnectionError::Stopped);
        }
        let auth = self
            .session
            .read()
            .as_ref()
            .map(|s| s.auth.clone())
            .ok_or(ConnectionError::Stopped)?;

        let handler: Arc<dyn FeedHandler> = Arc::new(SupervisorHandler {
            inner: Arc::downgrade(self),
        });

        match self.connection.connect(auth, handler).await? {
            ConnectOutcome::AlreadyConnected => Ok(()),
            ConnectOutcome::Established { generation } => {
                if !self.running.load(Ordering::SeqCst) {
                    self.connection.disconnect().await;
                    return Err(ConnectionError::Stopped);
                }
                if self.lost.swap(false, Ordering::SeqCst) {
                    self.reconnects.fetch_add(1, Ordering::Relaxed);
                    metrics::record_reconnect();
                    tracing::info!(generation, "Feed session re-established");
                }
                self.reconcile().await
            }
        }
    }

    /// Replay every registered symbol, then the execution-notice
    /// subscription if the session has an HTS id.
    async fn reconcile(&self) -> Result<(), ConnectionError> {
        let requests = self.registry.begin_reconciliation();
        self.publish_subscription_gauges();
        tracing::info!(symbols = requests.len(), "Reconciling subscriptions");

        let tick_tr_id = &self.config.message_types.tick;
        for request in &requests {
            self.connection
                .send(&FeedCommand::subscribe(tick_tr_id, &request.symbol))
                .await?;
        }

        let notice = self.session.read().as_ref().and_then(|s| {
            s.hts_id.as_ref().map(|hts_id| FeedCommand::Subscribe {
                tr_id: self.config.message_types.notice_for(s.demo).to_string(),
                tr_key: hts_id.clone(),
            })
        });
        if let Some(command) = notice {
            self.connection.send(&command).await?;
            tracing::info!("Execution notice subscription sent");
        }
        Ok(())
    }

    /// Send a command reflecting a registry change that has already been
    /// applied.
    async fn send_with_retry(self: &Arc<Self>, command: &FeedCommand) -> Result<(), FeedError> {
        let generation = self.connection.generation();
        self.config
            .send_retry
            .execute_with_hook(
                "feed_send",
                || async move {
                    // A newer session was reconciled from the updated registry.
                    if self.connection.generation() != generation {
                        tracing::debug!(
                            command = command.kind(),
                            "Command covered by reconciliation"
                        );
                        return Ok(());
                    }
                    self.connection.send(command).await
                },
                is_retryable_connection_error,
                || self.ensure_connected(),
            )
            .await
            .map_err(|e| FeedError::Command(Box::new(e)))
    }

    async fn publish(&self, events: impl IntoIterator<Item = FeedEvent>) {
        let gate = self.publish_gate.read().await;
        if !*gate {
            return;
        }
        for event in events {
            self.broadcaster.publish(&event);
        }
    }

    fn handle_ack(&self, ack: &ControlAck) {
        if !ack.success {
            tracing::warn!(
                tr_id = %ack.tr_id,
                tr_key = ?ack.tr_key,
                msg_code = %ack.msg_code,
                message = %ack.message,
                "Feed rejected subscription command"
            );
            return;
        }
        if ack.is_unsubscribe() {
            tracing::debug!(tr_key = ?ack.tr_key, "Unsubscribe acknowledged");
            return;
        }
        if let Some(symbol) = ack.symbol() {
            if self.registry.confirm(&symbol) {
                self.publish_subscription_gauges();
                tracing::debug!(%symbol, "Subscription confirmed");
            }
        } else {
            tracing::debug!(tr_id = %ack.tr_id, message = %ack.message, "Feed acknowledged command");
        }
    }

    fn publish_subscription_gauges(&self) {
        let stats = self.registry.stats();
        metrics::set_subscriptions(stats.pending, stats.confirmed);
    }

    /// Start a recovery task unless one is already running.
    fn request_recovery(self: &Arc<Self>, generation: u64) {
        let mut slot = self.recovery.lock();
        if slot.as_ref().is_some_and(|task| !task.cancel.is_cancelled()) {
            tracing::debug!(generation, "Feed recovery already in progress");
            return;
        }
        let id = self.recovery_ids.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        *slot = Some(RecoveryTask {
            id,
            cancel: cancel.clone(),
        });
        drop(slot);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = inner.recover() => Some(result),
            };

            {
                let mut slot = inner.recovery.lock();
                if slot.as_ref().is_some_and(|task| task.id == id) {
                    slot.take();
                }
            }

            match outcome {
                None => tracing::debug!(generation, "Feed recovery cancelled"),
                Some(Ok(())) => {
                    tracing::info!(generation, "Feed recovered");
                    // A drop between the settle check and releasing the slot was not reported.
                    if inner.running.load(Ordering::SeqCst) && !inner.connection.is_connected() {
                        inner.request_recovery(generation);
                    }
                }
                Some(Err(e)) => tracing::error!(
                    generation,
                    error = %e,
                    "Feed recovery gave up; next start or subscribe will retry"
                ),
            }
        });
    }

    async fn recover(self: &Arc<Self>) -> Result<(), RetryError<ConnectionError>> {
        let policy = self.config.recovery_retry;
        tokio::time::sleep(policy.delay).await;

        policy
            .execute(
                "feed_recover",
                || async move {
                    self.ensure_connected().await?;
                    tokio::time::sleep(policy.delay).await;
                    if self.connection.is_connected() {
                        Ok(())
                    } else {
                        Err(ConnectionError::NeedsReconnect)
                    }
                },
                is_retryable_connection_error,
            )
            .await
    }
}

// =============================================================================
// Frame Handler
// =============================================================================

struct SupervisorHandler {
    inner: Weak<SupervisorInner>,
}

#[async_trait]
impl FeedHandler for SupervisorHandler {
    async fn on_frame(&self, frame: DecodedFrame) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.frames_received.fetch_add(1, Ordering::Relaxed);

        match frame {
            DecodedFrame::Ticks(ticks) => {
                inner.publish(ticks.into_iter().map(FeedEvent::Tick)).await;
            }
            DecodedFrame::Execution(notice) => {
                inner.publish([FeedEvent::Execution(notice)]).await;
            }
            DecodedFrame::Control(ControlFrame::Ping { payload }) => {
                tracing::trace!("Answering feed heartbeat");
                if let Err(e) = inner
                    .connection
                    .send(&FeedCommand::HeartbeatAck { payload })
                    .await
                {
                    tracing::warn!(error = %e, "Failed to answer feed heartbeat");
                }
            }
            DecodedFrame::Control(ControlFrame::Ack(ack)) => inner.handle_ack(&ack),
            DecodedFrame::Unknown { tr_id } => {
                tracing::debug!(%tr_id, "Ignoring frame with unhandled transaction code");
            }
        }
    }

    fn on_connection_lost(&self, generation: u64) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if !inner.running.load(Ordering::SeqCst) {
            return;
        }
        inner.lost.store(true, Ordering::SeqCst);
        tracing::warn!(generation, "Feed connection lost, recovering");
        inner.request_recovery(generation);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::ports::{FeedConnector, TransportError, TransportSink, TransportStream};
    use crate::infrastructure::broadcast::Broadcaster;
    use crate::infrastructure::kis::{FeedConnectionConfig, FrameDecoder, LivenessConfig};

    struct RefusingConnector;

    #[async_trait]
    impl FeedConnector for RefusingConnector {
        async fn connect(
            &self,
            _url: &str,
        ) -> Result<(TransportSink, TransportStream), TransportError> {
            Err(TransportError::Connect("refused".to_string()))
        }
    }

    fn offline_supervisor() -> FeedSupervisor {
        let connection = FeedConnection::new(
            FeedConnectionConfig {
                url: "ws://test".to_string(),
                connect_retry: RetryPolicy::new(1, Duration::from_millis(1)),
                liveness: LivenessConfig::disabled(),
            },
            Arc::new(RefusingConnector),
            FrameDecoder::default(),
        );
        FeedSupervisor::new(
            connection,
            Arc::new(Broadcaster::new()),
            FeedSupervisorConfig::default(),
        )
    }

    #[tokio::test]
    async fn start_without_approval_key_is_unauthorized() {
        let supervisor = offline_supervisor();

        let result = supervisor.start(&FeedPrincipal::new("user-1")).await;

        assert!(matches!(result, Err(FeedError::Unauthorized(_))));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn start_failure_leaves_supervisor_stopped() {
        let supervisor = offline_supervisor();
        let principal = FeedPrincipal::new("user-1").with_approval_key("key");

        let result = supervisor.start(&principal).await;

        assert!(matches!(
            result,
            Err(FeedError::Connection(ConnectionError::ConnectFailed(_)))
        ));
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn subscribe_while_disconnected_only_updates_registry() {
        let supervisor = offline_supervisor();

        assert!(supervisor.subscribe("005930").await.unwrap());
        assert!(!supervisor.subscribe("005930").await.unwrap());
        assert!(supervisor.subscribe("000660").await.unwrap());

        let symbols: Vec<String> = supervisor
            .subscribed_symbols()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(symbols, vec!["000660", "005930"]);
    }

    #[tokio::test]
    async fn subscriptions_start_pending() {
        let supervisor = offline_supervisor();
        supervisor.subscribe("005930").await.unwrap();

        let entries = supervisor.subscriptions();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.as_str(), "005930");
        assert_eq!(entries[0].1, AckState::Pending);
    }

    #[tokio::test]
    async fn invalid_symbol_is_rejected() {
        let supervisor = offline_supervisor();

        assert!(matches!(
            supervisor.subscribe("AAPL").await,
            Err(FeedError::InvalidSymbol(_))
        ));
        assert!(matches!(
            supervisor.unsubscribe("12345").await,
            Err(FeedError::InvalidSymbol(_))
        ));
        assert!(supervisor.subscribed_symbols().is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_absent_symbol_is_noop() {
        let supervisor = offline_supervisor();

        assert!(!supervisor.unsubscribe("005930").await.unwrap());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_keeps_registry() {
        let supervisor = offline_supervisor();
        supervisor.subscribe("005930").await.unwrap();

        supervisor.stop().await;
        supervisor.stop().await;

        assert_eq!(supervisor.subscribed_symbols().len(), 1);
        let status = supervisor.status();
        assert!(!status.running);
        assert_eq!(status.subscriptions, 1);
        assert_eq!(status.connection_state, ConnectionState::Disconnected);
    }
}
