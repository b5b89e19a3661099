//! Shared harness for feed integration tests.
//!
//! Wires a real supervisor, connection and broadcaster to an in-memory
//! connector. Every connect hands the test a [`ServerEnd`] playing the venue.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use futures::StreamExt;
use futures::channel::mpsc;
use kis_realtime_feed::infrastructure::kis::layout;
use kis_realtime_feed::{
    Broadcaster, ChannelSink, FeedConnection, FeedConnectionConfig, FeedConnector, FeedEvent,
    FeedPrincipal, FeedSupervisor, FeedSupervisorConfig, FrameDecoder, LivenessConfig,
    ListenerFilter, RetryPolicy, TransportError, TransportMessage,
};
use kis_realtime_feed::application::ports::{TransportSink, TransportStream};

/// How long to wait for something that should happen.
pub const WAIT: Duration = Duration::from_secs(2);

/// How long to wait before concluding nothing more will arrive.
pub const QUIET: Duration = Duration::from_millis(150);

// =============================================================================
// Venue Side
// =============================================================================

/// Venue side of one in-memory session.
pub struct ServerEnd {
    to_client: mpsc::UnboundedSender<Result<TransportMessage, TransportError>>,
    from_client: mpsc::UnboundedReceiver<TransportMessage>,
}

impl ServerEnd {
    /// Push a text frame to the client. Ignored once the client is gone.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self
            .to_client
            .unbounded_send(Ok(TransportMessage::Text(text.into())));
    }

    /// Next text frame written by the client.
    pub async fn next_text(&mut self) -> String {
        loop {
            let message = tokio::time::timeout(WAIT, self.from_client.next())
                .await
                .expect("client wrote nothing")
                .expect("client closed the session");
            if let TransportMessage::Text(text) = message {
                return text;
            }
        }
    }

    /// Collect text frames until the client goes quiet.
    pub async fn drain_texts(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(Some(message)) = tokio::time::timeout(QUIET, self.from_client.next()).await {
            if let TransportMessage::Text(text) = message {
                texts.push(text);
            }
        }
        texts
    }

    /// Make every further client write fail.
    pub fn refuse_writes(&mut self) {
        self.from_client.close();
    }

    /// Drop the session from the venue side.
    pub fn hang_up(self) {
        drop(self);
    }
}

/// Connector handing out in-memory sessions.
pub struct MockConnector {
    sessions: tokio::sync::mpsc::UnboundedSender<ServerEnd>,
    connects: AtomicU32,
    refuse_writes: AtomicBool,
    hang_up: AtomicBool,
}

impl MockConnector {
    /// Number of connect calls so far.
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Open every further session with client writes failing.
    pub fn refuse_all_writes(&self) {
        self.refuse_writes.store(true, Ordering::SeqCst);
    }

    /// End every further session as soon as it opens.
    pub fn hang_up_at_once(&self) {
        self.hang_up.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl FeedConnector for MockConnector {
    async fn connect(&self, _url: &str) -> Result<(TransportSink, TransportStream), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let (to_client, client_rx) = mpsc::unbounded();
        let (client_tx, from_client) = mpsc::unbounded();
        let mut server = ServerEnd {
            to_client,
            from_client,
        };
        if self.refuse_writes.load(Ordering::SeqCst) {
            server.refuse_writes();
        }
        if !self.hang_up.load(Ordering::SeqCst) {
            self.sessions
                .send(server)
                .map_err(|_| TransportError::Connect("harness dropped".to_string()))?;
        }

        let sink = client_tx.sink_map_err(|e| TransportError::Send(e.to_string()));
        Ok((Box::pin(sink), Box::pin(client_rx)))
    }
}

// =============================================================================
// Harness
// =============================================================================

/// A supervisor wired to an in-memory venue.
pub struct Harness {
    pub supervisor: FeedSupervisor,
    pub broadcaster: Arc<Broadcaster>,
    pub connector: Arc<MockConnector>,
    sessions: tokio::sync::mpsc::UnboundedReceiver<ServerEnd>,
}

impl Harness {
    /// Build a stopped supervisor with fast retries and no idle watchdog.
    pub fn new() -> Self {
        Self::with_recovery(RetryPolicy::new(3, Duration::from_millis(5)))
    }

    /// Like [`Harness::new`], recovering from drops under `recovery`.
    pub fn with_recovery(recovery: RetryPolicy) -> Self {
        let (sessions_tx, sessions) = tokio::sync::mpsc::unbounded_channel();
        let connector = Arc::new(MockConnector {
            sessions: sessions_tx,
            connects: AtomicU32::new(0),
            refuse_writes: AtomicBool::new(false),
            hang_up: AtomicBool::new(false),
        });
        let broadcaster = Arc::new(Broadcaster::new());

        let connection = FeedConnection::new(
            FeedConnectionConfig {
                url: "ws://venue.test".to_string(),
                connect_retry: RetryPolicy::new(3, Duration::from_millis(5)),
                liveness: LivenessConfig::disabled(),
            },
            Arc::clone(&connector) as Arc<dyn FeedConnector>,
            FrameDecoder::default(),
        );
        let supervisor = FeedSupervisor::new(
            connection,
            Arc::clone(&broadcaster),
            FeedSupervisorConfig {
                send_retry: RetryPolicy::new(3, Duration::from_millis(5)),
                recovery_retry: recovery,
                ..FeedSupervisorConfig::default()
            },
        );

        Self {
            supervisor,
            broadcaster,
            connector,
            sessions,
        }
    }

    /// Register a channel listener receiving every event.
    pub fn listen(&self) -> tokio::sync::mpsc::Receiver<FeedEvent> {
        let (sink, rx) = ChannelSink::channel(64);
        self.broadcaster.register(ListenerFilter::All, Arc::new(sink));
        rx
    }

    /// Wait for the next session the supervisor opens.
    pub async fn next_session(&mut self) -> ServerEnd {
        tokio::time::timeout(WAIT, self.sessions.recv())
            .await
            .expect("no new session opened")
            .expect("connector dropped")
    }

    /// Fail if the supervisor opened a session nobody has taken yet.
    pub fn assert_no_session(&mut self) {
        assert!(self.sessions.try_recv().is_err(), "unexpected session opened");
    }

    /// Connect count once it has stopped changing.
    pub async fn settled_connects(&self) -> u32 {
        tokio::time::timeout(WAIT, async {
            let mut last = self.connector.connects();
            loop {
                tokio::time::sleep(QUIET).await;
                let now = self.connector.connects();
                if now == last {
                    return now;
                }
                last = now;
            }
        })
        .await
        .expect("supervisor kept reconnecting")
    }

    /// Poll until `check` holds.
    pub async fn eventually(&self, check: impl Fn(&FeedSupervisor) -> bool) {
        tokio::time::timeout(WAIT, async {
            while !check(&self.supervisor) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }
}

/// Principal with an approval key.
pub fn principal() -> FeedPrincipal {
    FeedPrincipal::new("user-1").with_approval_key("approval-key")
}

// =============================================================================
// Wire Helpers
// =============================================================================

/// A parsed outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentCommand {
    pub tr_type: String,
    pub tr_id: String,
    pub tr_key: String,
}

/// Parse a subscribe/unsubscribe command written by the client.
pub fn parse_command(text: &str) -> SentCommand {
    let value: serde_json::Value = serde_json::from_str(text).expect("command is JSON");
    let field = |pointer: &str| {
        value
            .pointer(pointer)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    SentCommand {
        tr_type: field("/header/tr_type"),
        tr_id: field("/body/input/tr_id"),
        tr_key: field("/body/input/tr_key"),
    }
}

/// Sorted keys of the subscribe commands among `texts`.
pub fn subscribed_keys(texts: &[String]) -> Vec<String> {
    let mut keys: Vec<String> = texts
        .iter()
        .map(|t| parse_command(t))
        .filter(|c| c.tr_type == "1")
        .map(|c| c.tr_key)
        .collect();
    keys.sort();
    keys
}

/// One tick record in the venue's field layout.
pub fn tick_record(symbol: &str, price: &str, sign: &str, change: &str) -> Vec<String> {
    let mut fields = vec!["0".to_string(); layout::DEFAULT_RECORD_WIDTH];
    fields[layout::SYMBOL] = symbol.to_string();
    fields[layout::TRADE_TIME] = "093015".to_string();
    fields[layout::PRICE] = price.to_string();
    fields[layout::CHANGE_SIGN] = sign.to_string();
    fields[layout::PRICE_CHANGE] = change.to_string();
    fields[layout::CHANGE_RATE] = "1.72".to_string();
    fields[layout::VOLUME] = "15".to_string();
    fields[layout::TOTAL_VOLUME] = "7388353".to_string();
    fields
}

/// A pipe-delimited tick frame.
pub fn tick_frame(records: &[Vec<String>]) -> String {
    let fields: Vec<String> = records.iter().flatten().cloned().collect();
    format!("0|H0STCNT0|{:03}|{}", records.len(), fields.join("^"))
}

/// A venue ping frame.
pub const PING_FRAME: &str =
    r#"{"header":{"tr_id":"PINGPONG","datetime":"20240102093000"}}"#;

/// A successful subscribe acknowledgement for `symbol`.
pub fn subscribe_ack(symbol: &str) -> String {
    format!(
        r#"{{"header":{{"tr_id":"H0STCNT0","tr_key":"{symbol}","encrypt":"N"}},"body":{{"rt_cd":"0","msg_cd":"OPSP0000","msg1":"SUBSCRIBE SUCCESS"}}}}"#
    )
}
