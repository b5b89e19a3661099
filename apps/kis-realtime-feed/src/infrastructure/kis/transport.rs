//! WebSocket transport adapter.
//!
//! Implements [`FeedConnector`] over `tokio-tungstenite`, mapping library
//! messages to [`TransportMessage`] so the connection logic never touches
//! the socket library directly.
//!
//! # Stream URLs
//!
//! - Real: `ws://ops.koreainvestment.com:21000`
//! - Demo: `ws://ops.koreainvestment.com:31000`

use async_trait::async_trait;
use futures::future;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::{
    FeedConnector, TransportError, TransportMessage, TransportSink, TransportStream,
};

/// Realtime feed URL for real accounts.
pub const REAL_WS_URL: &str = "ws://ops.koreainvestment.com:21000";

/// Realtime feed URL for demo accounts.
pub const DEMO_WS_URL: &str = "ws://ops.koreainvestment.com:31000";

/// Production connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<(TransportSink, TransportStream), TransportError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|message: TransportMessage| {
                future::ready(Ok::<_, TransportError>(to_ws(message)))
            });

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(message) => from_ws(message).map(Ok),
                Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

fn to_ws(message: TransportMessage) -> Message {
    match message {
        TransportMessage::Text(text) => Message::Text(text.into()),
        TransportMessage::Ping(data) => Message::Ping(data.into()),
        TransportMessage::Pong(data) => Message::Pong(data.into()),
        TransportMessage::Close(_) => Message::Close(None),
    }
}

fn from_ws(message: Message) -> Option<TransportMessage> {
    match message {
        Message::Text(text) => Some(TransportMessage::Text(text.as_str().to_string())),
        Message::Binary(data) => match String::from_utf8(data.to_vec()) {
            Ok(text) => Some(TransportMessage::Text(text)),
            Err(_) => {
                tracing::debug!(len = data.len(), "Ignoring non-UTF-8 binary frame");
                None
            }
        },
        Message::Ping(data) => Some(TransportMessage::Ping(data.to_vec())),
        Message::Pong(data) => Some(TransportMessage::Pong(data.to_vec())),
        Message::Close(frame) => Some(TransportMessage::Close(
            frame.map(|f| f.reason.as_str().to_string()),
        )),
        Message::Frame(_) => None,
    }
}
