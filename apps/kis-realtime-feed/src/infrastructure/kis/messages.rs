//! KIS WebSocket Message Types
//!
//! Wire format types for the Korea Investment & Securities realtime feed.
//!
//! # Inbound
//!
//! The venue sends two frame shapes on one socket:
//! - JSON control frames `{"header":{"tr_id":..},"body":{..}}` for pings,
//!   subscribe acks, ask/bid price updates and execution notices
//! - Pipe-delimited tick frames `0|H0STCNT0|002|f0^f1^...` (see the codec)
//!
//! # Outbound
//!
//! Subscribe and unsubscribe commands share one envelope, distinguished by
//! `tr_type` (`1` subscribe, `2` unsubscribe). The heartbeat ack is the
//! received `PINGPONG` frame echoed back verbatim.

use serde::{Deserialize, Deserializer, Serialize};

use super::auth::SessionAuth;
use crate::domain::subscription::Symbol;

// =============================================================================
// Transaction Codes
// =============================================================================

/// Domestic stock trade tick (pipe-delimited).
pub const TR_ID_TICK: &str = "H0STCNT0";

/// Domestic stock ask/bid price update (JSON).
pub const TR_ID_ASK_BID: &str = "H0STASP0";

/// Execution notice, real account.
pub const TR_ID_NOTICE: &str = "H0STCNI0";

/// Execution notice, demo account.
pub const TR_ID_NOTICE_DEMO: &str = "H0STCNI9";

/// Heartbeat ping.
pub const TR_ID_PING: &str = "PINGPONG";

/// Transaction codes that select the frame schema.
///
/// Configurable so a venue-side code change does not need a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTypes {
    /// Trade tick code, also used for symbol subscriptions.
    pub tick: String,
    /// Ask/bid price update code.
    pub ask_bid: String,
    /// Execution notice code for real accounts.
    pub notice: String,
    /// Execution notice code for demo accounts.
    pub notice_demo: String,
    /// Heartbeat ping code.
    pub ping: String,
}

impl Default for MessageTypes {
    fn default() -> Self {
        Self {
            tick: TR_ID_TICK.to_string(),
            ask_bid: TR_ID_ASK_BID.to_string(),
            notice: TR_ID_NOTICE.to_string(),
            notice_demo: TR_ID_NOTICE_DEMO.to_string(),
            ping: TR_ID_PING.to_string(),
        }
    }
}

impl MessageTypes {
    /// Execution notice code for the account kind.
    #[must_use]
    pub fn notice_for(&self, demo: bool) -> &str {
        if demo { &self.notice_demo } else { &self.notice }
    }

    /// Check if a code is one of the execution notice codes.
    #[must_use]
    pub fn is_notice(&self, tr_id: &str) -> bool {
        tr_id == self.notice || tr_id == self.notice_demo
    }
}

// =============================================================================
// Inbound JSON Frames
// =============================================================================

/// Any inbound JSON frame.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    /// Frame header.
    pub header: InboundHeader,
    /// Frame body; absent on pings.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

/// Header of an inbound JSON frame.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundHeader {
    /// Transaction code selecting the body schema.
    pub tr_id: String,
    /// Subscription key the frame refers to (symbol or HTS id).
    #[serde(default)]
    pub tr_key: Option<String>,
    /// `Y` when the body is encrypted.
    #[serde(default)]
    pub encrypt: Option<String>,
    /// Venue timestamp (`YYYYMMDDHHMMSS`), present on pings.
    #[serde(default)]
    pub datetime: Option<String>,
}

/// Body of a subscribe/unsubscribe reply.
#[derive(Debug, Clone, Deserialize)]
pub struct AckBody {
    /// Result code; `"0"` is success.
    #[serde(deserialize_with = "lenient_string")]
    pub rt_cd: String,
    /// Message code.
    #[serde(default, deserialize_with = "lenient_string")]
    pub msg_cd: String,
    /// Message text.
    #[serde(default, deserialize_with = "lenient_string")]
    pub msg1: String,
}

/// Body of a JSON ask/bid price update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PriceUpdateBody {
    /// Short instrument code.
    #[serde(deserialize_with = "lenient_string")]
    pub mksc_shrn_iscd: String,
    /// Trade time `HHMMSS`.
    #[serde(alias = "bsop_hour", deserialize_with = "lenient_string")]
    pub stck_cntg_hour: String,
    /// Current price.
    #[serde(deserialize_with = "lenient_string")]
    pub stck_prpr: String,
    /// Change sign code.
    #[serde(deserialize_with = "lenient_string")]
    pub prdy_vrss_sign: String,
    /// Change against the previous close.
    #[serde(deserialize_with = "lenient_string")]
    pub prdy_vrss: String,
    /// Change rate.
    #[serde(deserialize_with = "lenient_string")]
    pub prdy_ctrt: String,
    /// Session open.
    #[serde(deserialize_with = "lenient_string")]
    pub stck_oprc: String,
    /// Session high.
    #[serde(deserialize_with = "lenient_string")]
    pub stck_hgpr: String,
    /// Session low.
    #[serde(deserialize_with = "lenient_string")]
    pub stck_lwpr: String,
    /// Best ask.
    #[serde(alias = "askp1", deserialize_with = "lenient_string")]
    pub ask_price1: String,
    /// Best bid.
    #[serde(alias = "bidp1", deserialize_with = "lenient_string")]
    pub bid_price1: String,
    /// Trade volume.
    #[serde(deserialize_with = "lenient_string")]
    pub cntg_vol: String,
    /// Cumulative volume.
    #[serde(deserialize_with = "lenient_string")]
    pub acml_vol: String,
}

/// Body of an execution notice.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExecutionBody {
    /// Order number.
    #[serde(deserialize_with = "lenient_string")]
    pub odno: String,
    /// Processing status label.
    #[serde(deserialize_with = "lenient_string")]
    pub prcs_stat_name: String,
    /// Instrument code.
    #[serde(deserialize_with = "lenient_string")]
    pub pdno: String,
    /// Ordered quantity.
    #[serde(deserialize_with = "lenient_string")]
    pub ord_qty: String,
    /// Filled quantity.
    #[serde(deserialize_with = "lenient_string")]
    pub cntg_qty: String,
    /// Fill price.
    #[serde(deserialize_with = "lenient_string")]
    pub cntg_pric: String,
    /// Fill time `HHMMSS`.
    #[serde(deserialize_with = "lenient_string")]
    pub cntg_time: String,
    /// Order limit price.
    #[serde(deserialize_with = "lenient_string")]
    pub ord_unpr: String,
}

/// Accept strings, numbers or null for fields the venue sends loosely typed.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

// =============================================================================
// Outbound Commands
// =============================================================================

/// Command written to the feed socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    /// Start streaming `tr_id` for `tr_key`.
    Subscribe {
        /// Transaction code.
        tr_id: String,
        /// Symbol or HTS id.
        tr_key: String,
    },
    /// Stop streaming `tr_id` for `tr_key`.
    Unsubscribe {
        /// Transaction code.
        tr_id: String,
        /// Symbol or HTS id.
        tr_key: String,
    },
    /// Echo of a received ping frame.
    HeartbeatAck {
        /// The ping frame text, unchanged.
        payload: String,
    },
}

impl FeedCommand {
    /// Subscribe a symbol to the given transaction code.
    #[must_use]
    pub fn subscribe(tr_id: &str, symbol: &Symbol) -> Self {
        Self::Subscribe {
            tr_id: tr_id.to_string(),
            tr_key: symbol.to_string(),
        }
    }

    /// Unsubscribe a symbol from the given transaction code.
    #[must_use]
    pub fn unsubscribe(tr_id: &str, symbol: &Symbol) -> Self {
        Self::Unsubscribe {
            tr_id: tr_id.to_string(),
            tr_key: symbol.to_string(),
        }
    }

    /// Short label used for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::HeartbeatAck { .. } => "heartbeat_ack",
        }
    }

    /// Encode the command as wire text using the session's header values.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, auth: &SessionAuth) -> Result<String, serde_json::Error> {
        let (tr_type, tr_id, tr_key) = match self {
            Self::HeartbeatAck { payload } => return Ok(payload.clone()),
            Self::Subscribe { tr_id, tr_key } => ("1", tr_id, tr_key),
            Self::Unsubscribe { tr_id, tr_key } => ("2", tr_id, tr_key),
        };

        serde_json::to_string(&CommandEnvelope {
            header: CommandHeader {
                approval_key: auth.approval_key(),
                custtype: auth.custtype(),
                tr_type,
                content_type: "utf-8",
            },
            body: CommandBody {
                input: CommandInput { tr_id, tr_key },
            },
        })
    }
}

#[derive(Serialize)]
struct CommandEnvelope<'a> {
    header: CommandHeader<'a>,
    body: CommandBody<'a>,
}

#[derive(Serialize)]
struct CommandHeader<'a> {
    approval_key: &'a str,
    custtype: &'a str,
    tr_type: &'a str,
    #[serde(rename = "content-type")]
    content_type: &'a str,
}

#[derive(Serialize)]
struct CommandBody<'a> {
    input: CommandInput<'a>,
}

#[derive(Serialize)]
struct CommandInput<'a> {
    tr_id: &'a str,
    tr_key: &'a str,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::session::CustomerType;

    fn auth() -> SessionAuth {
        SessionAuth::new("approval-xyz", CustomerType::Personal).unwrap()
    }

    #[test]
    fn subscribe_command_envelope() {
        let symbol = Symbol::parse("005930").unwrap();
        let text = FeedCommand::subscribe(TR_ID_TICK, &symbol)
            .encode(&auth())
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "header": {
                    "approval_key": "approval-xyz",
                    "custtype": "P",
                    "tr_type": "1",
                    "content-type": "utf-8"
                },
                "body": { "input": { "tr_id": "H0STCNT0", "tr_key": "005930" } }
            })
        );
    }

    #[test]
    fn unsubscribe_uses_tr_type_two() {
        let symbol = Symbol::parse("000660").unwrap();
        let text = FeedCommand::unsubscribe(TR_ID_TICK, &symbol)
            .encode(&auth())
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["header"]["tr_type"], "2");
        assert_eq!(value["body"]["input"]["tr_key"], "000660");
    }

    #[test]
    fn heartbeat_ack_echoes_payload() {
        let ping = r#"{"header":{"tr_id":"PINGPONG","datetime":"20240102093000"}}"#;
        let text = FeedCommand::HeartbeatAck {
            payload: ping.to_string(),
        }
        .encode(&auth())
        .unwrap();

        assert_eq!(text, ping);
    }

    #[test]
    fn ack_body_accepts_numeric_fields() {
        let body: AckBody =
            serde_json::from_value(json!({"rt_cd": 0, "msg_cd": "OPSP0000", "msg1": "SUBSCRIBE SUCCESS"}))
                .unwrap();
        assert_eq!(body.rt_cd, "0");
        assert_eq!(body.msg1, "SUBSCRIBE SUCCESS");
    }

    #[test]
    fn price_update_body_accepts_aliases() {
        let body: PriceUpdateBody = serde_json::from_value(json!({
            "mksc_shrn_iscd": "005930",
            "stck_prpr": 76900,
            "askp1": "77000",
            "bidp1": "76900"
        }))
        .unwrap();

        assert_eq!(body.stck_prpr, "76900");
        assert_eq!(body.ask_price1, "77000");
        assert_eq!(body.bid_price1, "76900");
        assert!(body.prdy_vrss.is_empty());
    }

    #[test]
    fn notice_code_by_account_kind() {
        let types = MessageTypes::default();
        assert_eq!(types.notice_for(false), "H0STCNI0");
        assert_eq!(types.notice_for(true), "H0STCNI9");
        assert!(types.is_notice("H0STCNI9"));
        assert!(!types.is_notice("H0STCNT0"));
    }
}
