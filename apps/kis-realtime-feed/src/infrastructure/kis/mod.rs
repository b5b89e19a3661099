//! KIS Realtime Feed Adapters
//!
//! Client side of the Korea Investment & Securities realtime WebSocket feed:
//!
//! - **Wire**: command/frame types, field layout, frame decoder
//! - **Session**: approval-key auth, transport adapter, idle watchdog
//! - **Connection**: connect/send/receive loop with generation-scoped teardown

pub mod auth;
pub mod codec;
pub mod connection;
pub mod layout;
pub mod liveness;
pub mod messages;
pub mod transport;

pub use auth::{AuthError, SessionAuth};
pub use codec::{
    CodecError, ControlAck, ControlFrame, DecodedFrame, FrameDecoder, FrameKind,
};
pub use connection::{
    ConnectOutcome, ConnectionError, FeedConnection, FeedConnectionConfig, FeedHandler,
    is_retryable_connection_error,
};
pub use liveness::{LivenessConfig, LivenessMonitor, LivenessState};
pub use messages::{FeedCommand, MessageTypes};
pub use transport::{DEMO_WS_URL, REAL_WS_URL, WebSocketConnector};
