//! Feed Connection
//!
//! Owns the transport session to the KIS realtime feed: connect, send,
//! receive loop and disconnect.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected
//!      ▲                        │                  │
//!      └────────── failed ──────┘                  │
//!      └──── drop / send failure / disconnect ─────┘   (Closing while
//!                                                       disconnecting)
//! ```
//!
//! # Sessions
//!
//! Every successful connect starts a new session with a generation number
//! and a receive loop task. Teardown is always scoped to a generation, so a
//! late teardown from an old session never clobbers a newer one.
//!
//! An unexpected drop (stream end, close frame, transport error, idle
//! timeout, failed write) tears the session down and reports it once through
//! [`FeedHandler::on_connection_lost`]. Reconnecting is the handler's job.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::auth::SessionAuth;
use super::codec::{CodecError, DecodedFrame, FrameDecoder};
use super::liveness::{LivenessConfig, LivenessMonitor, LivenessState};
use super::messages::FeedCommand;
use crate::application::ports::{
    FeedConnector, TransportError, TransportMessage, TransportSink, TransportStream,
};
use crate::domain::streaming::ConnectionState;
use crate::infrastructure::metrics;
use crate::infrastructure::resilience::{RetryError, RetryPolicy};

/// How long `disconnect` waits for the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest frame prefix included in decode-failure logs.
const LOG_FRAME_PREFIX: usize = 120;

// =============================================================================
// Error Type
// =============================================================================

/// Errors from the feed connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// No usable session; the caller should reconnect and retry.
    #[error("feed connection needs reconnect")]
    NeedsReconnect,

    /// Connecting failed after all retries.
    #[error("feed connect failed: {0}")]
    ConnectFailed(#[source] Box<RetryError<TransportError>>),

    /// A connect was aborted by a concurrent disconnect.
    #[error("feed connection closed by caller")]
    Closed,

    /// The feed is not running, so no reconnect will be attempted.
    #[error("feed is stopped")]
    Stopped,

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Command encoding failed.
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    /// Frame decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Whether a connection error means "reconnect and try again".
///
/// The default retry predicate for feed I/O.
#[must_use]
pub const fn is_retryable_connection_error(error: &ConnectionError) -> bool {
    matches!(
        error,
        ConnectionError::NeedsReconnect | ConnectionError::Transport(_)
    )
}

// =============================================================================
// Handler
// =============================================================================

/// Receiver of decoded frames and session loss notifications.
#[async_trait]
pub trait FeedHandler: Send + Sync {
    /// Handle one decoded frame, in arrival order.
    ///
    /// Must not call [`FeedConnection::connect`] or
    /// [`FeedConnection::disconnect`] inline.
    async fn on_frame(&self, frame: DecodedFrame);

    /// The session with `generation` dropped unexpectedly. Called at most
    /// once per generation, never for an explicit disconnect.
    fn on_connection_lost(&self, generation: u64);
}

/// Result of a connect call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new session was opened.
    Established {
        /// Generation of the new session.
        generation: u64,
    },
    /// Another caller had already connected.
    AlreadyConnected,
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the feed connection.
#[derive(Debug, Clone)]
pub struct FeedConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Retry policy for opening the session.
    pub connect_retry: RetryPolicy,
    /// Idle watchdog configuration.
    pub liveness: LivenessConfig,
}

impl FeedConnectionConfig {
    /// Create a configuration with default retry and liveness settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_retry: RetryPolicy::default(),
            liveness: LivenessConfig::default(),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct LiveWriter {
    sink: TransportSink,
    auth: SessionAuth,
    generation: u64,
}

struct SessionHandle {
    generation: u64,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    handler: Arc<dyn FeedHandler>,
}

struct Shared {
    config: FeedConnectionConfig,
    connector: Arc<dyn FeedConnector>,
    decoder: FrameDecoder,
    state: RwLock<ConnectionState>,
    /// Serialises connect and disconnect.
    connect_gate: tokio::sync::Mutex<()>,
    /// Cancelled by `disconnect` to abort an in-flight connect.
    connect_abort: Mutex<CancellationToken>,
    /// Serialised send path. State changes to and from `Connected` happen
    /// while this is held.
    writer: tokio::sync::Mutex<Option<LiveWriter>>,
    session: Mutex<Option<SessionHandle>>,
    generation: AtomicU64,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
            metrics::set_connection_state(state);
        }
    }

    /// Tear down `generation` after the receive loop saw it drop.
    ///
    /// Returns `false` if a newer session (or a disconnect) already replaced it.
    async fn teardown(&self, generation: u64) -> bool {
        let mut writer = self.writer.lock().await;
        if writer.as_ref().map(|w| w.generation) != Some(generation) {
            return false;
        }
        writer.take();
        {
            let mut session = self.session.lock();
            if session.as_ref().map(|s| s.generation) == Some(generation) {
                session.take();
            }
        }
        self.set_state(ConnectionState::Disconnected);
        true
    }

    /// Abandon `generation` after a failed write and notify its handler.
    fn abandon(&self, generation: u64) {
        let handle = {
            let mut session = self.session.lock();
            if session.as_ref().map(|s| s.generation) == Some(generation) {
                session.take()
            } else {
                None
            }
        };
        if let Some(handle) = handle {
            handle.cancel.cancel();
            metrics::record_connection_lost("send_failed");
            handle.handler.on_connection_lost(generation);
        }
    }

    /// Write a transport message if `generation` is still the live session.
    async fn write_for(&self, generation: u64, message: TransportMessage) -> bool {
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(live) if live.generation == generation => live.sink.send(message).await.is_ok(),
            _ => false,
        }
    }
}

// =============================================================================
// Feed Connection
// =============================================================================

/// Single transport session to the realtime feed.
pub struct FeedConnection {
    shared: Arc<Shared>,
}

impl FeedConnection {
    /// Create a disconnected connection.
    #[must_use]
    pub fn new(
        config: FeedConnectionConfig,
        connector: Arc<dyn FeedConnector>,
        decoder: FrameDecoder,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                decoder,
                state: RwLock::new(ConnectionState::Disconnected),
                connect_gate: tokio::sync::Mutex::new(()),
                connect_abort: Mutex::new(CancellationToken::new()),
                writer: tokio::sync::Mutex::new(None),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Check if a session is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Generation of the most recent session (0 before the first connect).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.generation.load(Ordering::SeqCst)
    }

    /// Feed URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.shared.config.url
    }

    /// Open a session, unless one is already live.
    ///
    /// Concurrent callers are serialised; the losers of a race get
    /// [`ConnectOutcome::AlreadyConnected`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ConnectFailed`] when every connect attempt
    /// failed, or [`ConnectionError::Closed`] if a disconnect aborted it.
    pub async fn connect(
        &self,
        auth: SessionAuth,
        handler: Arc<dyn FeedHandler>,
    ) -> Result<ConnectOutcome, ConnectionError> {
        let _gate = self.shared.connect_gate.lock().await;

        if self.shared.state().is_connected() {
            tracing::debug!("Feed already connected");
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        let abort = self.shared.connect_abort.lock().clone();
        let url = self.shared.config.url.clone();
        self.shared.set_state(ConnectionState::Connecting);
        tracing::info!(url = %url, "Connecting to KIS realtime feed");

        let attempt = self.shared.config.connect_retry.execute(
            "feed_connect",
            || self.shared.connector.connect(&url),
            |_: &TransportError| true,
        );

        let result = tokio::select! {
            () = abort.cancelled() => {
                self.shared.set_state(ConnectionState::Disconnected);
                tracing::info!("Connect aborted by disconnect");
                return Err(ConnectionError::Closed);
            }
            result = attempt => result,
        };

        let (sink, stream) = match result {
            Ok(halves) => halves,
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                tracing::error!(url = %url, error = %e, "Failed to connect to KIS realtime feed");
                return Err(ConnectionError::ConnectFailed(Box::new(e)));
            }
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = Uuid::new_v4();

        let mut writer = self.shared.writer.lock().await;
        *writer = Some(LiveWriter {
            sink,
            auth,
            generation,
        });
        self.shared.set_state(ConnectionState::Connected);

        let cancel = CancellationToken::new();
        let span = tracing::info_span!("feed_session", %session_id, generation);
        let join = tokio::spawn(
            receive_loop(
                Arc::clone(&self.shared),
                stream,
                Arc::clone(&handler),
                generation,
                cancel.clone(),
            )
            .instrument(span),
        );

        let previous = self.shared.session.lock().replace(SessionHandle {
            generation,
            cancel,
            join,
            handler,
        });
        drop(writer);

        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        tracing::info!(%session_id, generation, "Connected to KIS realtime feed");
        Ok(ConnectOutcome::Established { generation })
    }

    /// Encode and write a command on the live session.
    ///
    /// Writes are serialised and go out in call order.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NeedsReconnect`] if there is no live
    /// session or the write failed. A failed write also tears the session
    /// down and reports it through the handler.
    pub async fn send(&self, command: &FeedCommand) -> Result<(), ConnectionError> {
        let mut writer = self.shared.writer.lock().await;
        let Some(live) = writer.as_mut() else {
            return Err(ConnectionError::NeedsReconnect);
        };

        let text = command.encode(&live.auth)?;
        match live.sink.send(TransportMessage::Text(text)).await {
            Ok(()) => {
                tracing::debug!(command = command.kind(), "Command sent");
                Ok(())
            }
            Err(e) => {
                let generation = live.generation;
                tracing::warn!(
                    command = command.kind(),
                    generation,
                    error = %e,
                    "Send failed, invalidating session"
                );
                writer.take();
                self.shared.set_state(ConnectionState::Disconnected);
                drop(writer);
                self.shared.abandon(generation);
                Err(ConnectionError::NeedsReconnect)
            }
        }
    }

    /// Close the session, if any.
    ///
    /// Idempotent. Aborts an in-flight connect. Once this returns, the
    /// receive loop has exited and no further frame reaches the handler.
    pub async fn disconnect(&self) {
        {
            let mut abort = self.shared.connect_abort.lock();
            abort.cancel();
            *abort = CancellationToken::new();
        }

        let _gate = self.shared.connect_gate.lock().await;

        let handle = self.shared.session.lock().take();
        if handle.is_none() && self.shared.state() == ConnectionState::Disconnected {
            return;
        }

        self.shared.set_state(ConnectionState::Closing);

        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.join.await {
                tracing::warn!(error = %e, "Receive loop ended abnormally");
            }
        }

        let live = self.shared.writer.lock().await.take();
        if let Some(mut live) = live {
            let _ = live.sink.send(TransportMessage::Close(None)).await;
            if tokio::time::timeout(CLOSE_TIMEOUT, live.sink.close())
                .await
                .is_err()
            {
                tracing::debug!("Timed out closing feed socket");
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        tracing::info!("Disconnected from KIS realtime feed");
    }
}

impl std::fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedConnection")
            .field("url", &self.shared.config.url)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Receive Loop
// =============================================================================

/// Why a session ended without being asked to.
#[derive(Debug)]
enum DropReason {
    StreamEnded,
    CloseFrame(Option<String>),
    Transport(TransportError),
    IdleTimeout(Duration),
}

impl DropReason {
    const fn label(&self) -> &'static str {
        match self {
            Self::StreamEnded => "stream_ended",
            Self::CloseFrame(_) => "close_frame",
            Self::Transport(_) => "transport_error",
            Self::IdleTimeout(_) => "idle_timeout",
        }
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    mut stream: TransportStream,
    handler: Arc<dyn FeedHandler>,
    generation: u64,
    cancel: CancellationToken,
) {
    let monitor = LivenessMonitor::new(shared.config.liveness, Arc::new(LivenessState::new()));
    let liveness = monitor.state();
    let idle = monitor.idle_expired();
    tokio::pin!(idle);

    let reason = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::debug!("Receive loop cancelled");
                return;
            }
            idle_for = &mut idle => break DropReason::IdleTimeout(idle_for),
            message = stream.next() => {
                match message {
                    Some(Ok(TransportMessage::Text(text))) => {
                        liveness.record_activity();
                        handle_text(&shared, handler.as_ref(), &text).await;
                    }
                    Some(Ok(TransportMessage::Ping(data))) => {
                        liveness.record_activity();
                        if !shared.write_for(generation, TransportMessage::Pong(data)).await {
                            tracing::debug!("Failed to answer transport ping");
                        }
                    }
                    Some(Ok(TransportMessage::Pong(_))) => {
                        liveness.record_activity();
                    }
                    Some(Ok(TransportMessage::Close(reason))) => {
                        break DropReason::CloseFrame(reason);
                    }
                    Some(Err(e)) => break DropReason::Transport(e),
                    None => break DropReason::StreamEnded,
                }
            }
        }
    };

    if cancel.is_cancelled() {
        return;
    }

    tracing::warn!(reason = reason.label(), detail = ?reason, "Feed connection lost");

    if shared.teardown(generation).await {
        metrics::record_connection_lost(reason.label());
        handler.on_connection_lost(generation);
    }
}

async fn handle_text(shared: &Shared, handler: &dyn FeedHandler, text: &str) {
    match shared.decoder.decode_text(text) {
        Ok(frame) => {
            metrics::record_frame(frame.label());
            handler.on_frame(frame).await;
        }
        Err(e) => {
            metrics::record_decode_failure();
            tracing::warn!(
                error = %e,
                frame = %truncate(text, LOG_FRAME_PREFIX),
                "Failed to decode feed frame"
            );
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
