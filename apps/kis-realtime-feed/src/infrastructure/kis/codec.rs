//! Frame Decoder
//!
//! Classifies raw text frames from the KIS realtime socket and decodes them
//! into typed records.
//!
//! - **JSON control frames**: pings, subscribe acks, ask/bid price updates and
//!   execution notices, selected by `header.tr_id`
//! - **Pipe-delimited frames**: batched trade ticks addressed by the fixed
//!   field layout in [`layout`](super::layout)
//!
//! # Robustness
//!
//! Decoding is permissive in the same places the venue is loose: unparsable
//! numbers become zero, and a malformed time becomes "now". Each such
//! substitution is counted in `kis_feed_permissive_defaults_total{field}`.
//! A bad record inside a batch is skipped without failing the batch.

use std::str::FromStr;

use chrono::{Local, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

use super::layout;
use super::messages::{AckBody, ExecutionBody, InboundFrame, MessageTypes, PriceUpdateBody};
use crate::domain::streaming::{ChangeType, ExecutionNotice, TickRecord};
use crate::domain::subscription::Symbol;
use crate::infrastructure::metrics;

// =============================================================================
// Errors
// =============================================================================

/// Decode errors. None of these are fatal to the connection.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON frame failed to parse.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame structure is not one the decoder understands.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

// =============================================================================
// Frame Types
// =============================================================================

/// Shape of a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// JSON object frame.
    JsonControl,
    /// `flag|tr_id|count|fields` frame.
    PipeDelimited,
}

impl FrameKind {
    /// Get the kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::JsonControl => "json",
            Self::PipeDelimited => "pipe",
        }
    }
}

/// Venue reply to a subscribe or unsubscribe command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlAck {
    /// Transaction code the reply refers to.
    pub tr_id: String,
    /// Subscription key from the header, if any.
    pub tr_key: Option<String>,
    /// `rt_cd == "0"`.
    pub success: bool,
    /// Venue message code.
    pub msg_code: String,
    /// Venue message text.
    pub message: String,
}

/// `msg1` of a successful unsubscribe acknowledgement.
const UNSUBSCRIBE_REPLY: &str = "UNSUBSCRIBE SUCCESS";

impl ControlAck {
    /// Symbol the ack refers to, if the key is a valid symbol.
    #[must_use]
    pub fn symbol(&self) -> Option<Symbol> {
        self.tr_key.as_deref().and_then(|key| Symbol::parse(key).ok())
    }

    /// Check if the ack answers an unsubscribe command.
    ///
    /// The venue shares one message code between both replies and only
    /// tells them apart by `msg1`: `"SUBSCRIBE SUCCESS"` or
    /// `"UNSUBSCRIBE SUCCESS"`.
    #[must_use]
    pub fn is_unsubscribe(&self) -> bool {
        self.message.trim().eq_ignore_ascii_case(UNSUBSCRIBE_REPLY)
    }
}

/// Control frame that is never published to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// Heartbeat ping; `payload` is the raw frame text to echo back.
    Ping {
        /// Raw frame text.
        payload: String,
    },
    /// Subscribe/unsubscribe reply.
    Ack(ControlAck),
}

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedFrame {
    /// Zero or more trade ticks.
    Ticks(Vec<TickRecord>),
    /// One execution notice.
    Execution(ExecutionNotice),
    /// Ping or ack.
    Control(ControlFrame),
    /// A frame with a transaction code the decoder does not handle.
    Unknown {
        /// The unhandled code.
        tr_id: String,
    },
}

impl DecodedFrame {
    /// Short label used for logging and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Ticks(_) => "ticks",
            Self::Execution(_) => "execution",
            Self::Control(ControlFrame::Ping { .. }) => "ping",
            Self::Control(ControlFrame::Ack(_)) => "ack",
            Self::Unknown { .. } => "unknown",
        }
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Stateless frame decoder configured with the venue's transaction codes.
#[derive(Debug, Clone, Default)]
pub struct FrameDecoder {
    types: MessageTypes,
}

impl FrameDecoder {
    /// Create a decoder for the given transaction codes.
    #[must_use]
    pub const fn new(types: MessageTypes) -> Self {
        Self { types }
    }

    /// Transaction codes this decoder recognises.
    #[must_use]
    pub const fn message_types(&self) -> &MessageTypes {
        &self.types
    }

    /// Classify a raw frame by its first non-blank character.
    #[must_use]
    pub fn classify(raw: &str) -> FrameKind {
        if raw.trim_start().starts_with('{') {
            FrameKind::JsonControl
        } else {
            FrameKind::PipeDelimited
        }
    }

    /// Classify and decode in one step.
    ///
    /// # Errors
    ///
    /// See [`decode`](Self::decode).
    pub fn decode_text(&self, raw: &str) -> Result<DecodedFrame, CodecError> {
        self.decode(raw, Self::classify(raw))
    }

    /// Decode a frame of a known kind.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] for unparsable JSON and
    /// [`CodecError::MalformedFrame`] for encrypted or truncated frames.
    /// Unknown transaction codes are not errors.
    pub fn decode(&self, raw: &str, kind: FrameKind) -> Result<DecodedFrame, CodecError> {
        match kind {
            FrameKind::JsonControl => self.decode_json(raw),
            FrameKind::PipeDelimited => self.decode_pipe(raw),
        }
    }

    fn decode_json(&self, raw: &str) -> Result<DecodedFrame, CodecError> {
        let frame: InboundFrame = serde_json::from_str(raw.trim())?;
        let tr_id = frame.header.tr_id;

        if tr_id == self.types.ping {
            return Ok(DecodedFrame::Control(ControlFrame::Ping {
                payload: raw.to_string(),
            }));
        }

        let Some(body) = frame.body else {
            tracing::debug!(tr_id = %tr_id, "JSON frame without body");
            return Ok(DecodedFrame::Unknown { tr_id });
        };

        if body.get("rt_cd").is_some() {
            let ack: AckBody = serde_json::from_value(body)?;
            return Ok(DecodedFrame::Control(ControlFrame::Ack(ControlAck {
                success: ack.rt_cd == "0",
                tr_id,
                tr_key: frame.header.tr_key,
                msg_code: ack.msg_cd,
                message: ack.msg1,
            })));
        }

        if tr_id == self.types.ask_bid {
            let update: PriceUpdateBody = serde_json::from_value(body)?;
            return Ok(DecodedFrame::Ticks(
                tick_from_price_update(&update, frame.header.tr_key.as_deref())
                    .into_iter()
                    .collect(),
            ));
        }

        if self.types.is_notice(&tr_id) {
            if frame.header.encrypt.as_deref() == Some("Y") {
                return Err(CodecError::MalformedFrame(format!(
                    "encrypted execution notice ({tr_id})"
                )));
            }
            let notice: ExecutionBody = serde_json::from_value(body)?;
            return Ok(DecodedFrame::Execution(execution_from_body(notice)));
        }

        tracing::debug!(tr_id = %tr_id, "Unhandled JSON transaction code");
        Ok(DecodedFrame::Unknown { tr_id })
    }

    fn decode_pipe(&self, raw: &str) -> Result<DecodedFrame, CodecError> {
        let sections: Vec<&str> = raw.trim().splitn(4, layout::SECTION_SEPARATOR).collect();
        let [flag, tr_id, count, payload] = sections.as_slice() else {
            return Err(CodecError::MalformedFrame(format!(
                "expected 4 sections, got {}",
                sections.len()
            )));
        };

        if *flag != layout::PLAINTEXT_FLAG {
            return Err(CodecError::MalformedFrame(format!(
                "encrypted payload for {tr_id} is not supported"
            )));
        }

        if *tr_id != self.types.tick {
            tracing::debug!(tr_id = %tr_id, "Unhandled pipe transaction code");
            return Ok(DecodedFrame::Unknown {
                tr_id: (*tr_id).to_string(),
            });
        }

        let fields: Vec<&str> = payload.split(layout::FIELD_SEPARATOR).collect();
        let width = record_width(fields.len(), count);

        let ticks = fields
            .chunks(width)
            .enumerate()
            .filter_map(|(index, record)| tick_from_record(index, record))
            .collect();

        Ok(DecodedFrame::Ticks(ticks))
    }
}

/// Fields per record: the header count when it divides the list evenly,
/// otherwise the venue's default width.
fn record_width(field_count: usize, count: &str) -> usize {
    match count.trim().parse::<usize>() {
        Ok(n) if n > 0 && field_count % n == 0 && field_count / n > 0 => field_count / n,
        _ => layout::DEFAULT_RECORD_WIDTH,
    }
}

fn tick_from_record(index: usize, record: &[&str]) -> Option<TickRecord> {
    if record.len() < layout::MIN_RECORD_WIDTH {
        tracing::debug!(
            record = index,
            fields = record.len(),
            "Record too short, skipping"
        );
        return None;
    }

    let symbol = match Symbol::parse(record[layout::SYMBOL]) {
        Ok(symbol) => symbol,
        Err(e) => {
            tracing::debug!(record = index, error = %e, "Invalid symbol in record, skipping");
            return None;
        }
    };

    let price_change = parse_decimal("price_change", record[layout::PRICE_CHANGE]);

    Some(TickRecord {
        symbol,
        price: parse_decimal("price", record[layout::PRICE]),
        change_type: change_type(record[layout::CHANGE_SIGN], price_change),
        price_change,
        change_rate: parse_decimal("change_rate", record[layout::CHANGE_RATE]),
        volume: clamp_volume(parse_integer("volume", record[layout::VOLUME])),
        total_volume: parse_integer("total_volume", record[layout::TOTAL_VOLUME]),
        open_price: parse_decimal("open_price", record[layout::OPEN_PRICE]),
        high_price: parse_decimal("high_price", record[layout::HIGH_PRICE]),
        low_price: parse_decimal("low_price", record[layout::LOW_PRICE]),
        best_ask: parse_decimal("best_ask", record[layout::BEST_ASK]),
        best_bid: parse_decimal("best_bid", record[layout::BEST_BID]),
        trade_time: parse_trade_time(record[layout::TRADE_TIME]),
    })
}

fn tick_from_price_update(body: &PriceUpdateBody, tr_key: Option<&str>) -> Option<TickRecord> {
    let code = if body.mksc_shrn_iscd.is_empty() {
        tr_key.unwrap_or_default()
    } else {
        body.mksc_shrn_iscd.as_str()
    };

    let symbol = match Symbol::parse(code) {
        Ok(symbol) => symbol,
        Err(e) => {
            tracing::debug!(error = %e, "Invalid symbol in price update, skipping");
            return None;
        }
    };

    let price_change = parse_decimal("price_change", &body.prdy_vrss);

    Some(TickRecord {
        symbol,
        price: parse_decimal("price", &body.stck_prpr),
        change_type: change_type(&body.prdy_vrss_sign, price_change),
        price_change,
        change_rate: parse_decimal("change_rate", &body.prdy_ctrt),
        volume: clamp_volume(parse_integer("volume", &body.cntg_vol)),
        total_volume: parse_integer("total_volume", &body.acml_vol),
        open_price: parse_decimal("open_price", &body.stck_oprc),
        high_price: parse_decimal("high_price", &body.stck_hgpr),
        low_price: parse_decimal("low_price", &body.stck_lwpr),
        best_ask: parse_decimal("best_ask", &body.ask_price1),
        best_bid: parse_decimal("best_bid", &body.bid_price1),
        trade_time: parse_trade_time(&body.stck_cntg_hour),
    })
}

fn execution_from_body(body: ExecutionBody) -> ExecutionNotice {
    ExecutionNotice {
        ordered_quantity: parse_integer("ordered_quantity", &body.ord_qty),
        filled_quantity: parse_integer("filled_quantity", &body.cntg_qty),
        fill_price: parse_decimal("fill_price", &body.cntg_pric),
        order_price: parse_decimal("order_price", &body.ord_unpr),
        fill_time: parse_trade_time(&body.cntg_time),
        order_id: body.odno,
        instrument: body.pdno,
        status: body.prcs_stat_name,
    }
}

// =============================================================================
// Field Parsing
// =============================================================================

/// Direction from the sign code; when the code is absent, from the change.
fn change_type(sign: &str, price_change: Decimal) -> ChangeType {
    let sign = sign.trim();
    if layout::RISE_CODES.contains(&sign) {
        ChangeType::Rise
    } else if layout::FALL_CODES.contains(&sign) {
        ChangeType::Fall
    } else if sign.is_empty() && price_change > Decimal::ZERO {
        ChangeType::Rise
    } else if sign.is_empty() && price_change < Decimal::ZERO {
        ChangeType::Fall
    } else {
        ChangeType::Unchanged
    }
}

/// Parse a decimal, substituting zero. Absent values are zero silently;
/// present but unparsable values are counted.
fn parse_decimal(field: &'static str, raw: &str) -> Decimal {
    let raw = raw.trim();
    if raw.is_empty() {
        return Decimal::ZERO;
    }
    Decimal::from_str(raw).unwrap_or_else(|_| {
        metrics::record_permissive_default(field);
        Decimal::ZERO
    })
}

/// Parse a whole number (decimals are truncated), substituting zero.
fn parse_integer(field: &'static str, raw: &str) -> i64 {
    let raw = raw.trim();
    if raw.is_empty() {
        return 0;
    }
    match Decimal::from_str(raw).map(|d| d.trunc().to_i64()) {
        Ok(Some(value)) => value,
        _ => {
            metrics::record_permissive_default(field);
            0
        }
    }
}

fn clamp_volume(volume: i64) -> i32 {
    i32::try_from(volume).unwrap_or(if volume > 0 { i32::MAX } else { i32::MIN })
}

/// Parse `HHMMSS` onto today's local date, falling back to now.
fn parse_trade_time(raw: &str) -> NaiveDateTime {
    let raw = raw.trim();
    let parsed = (raw.len() == layout::TRADE_TIME_LENGTH && raw.bytes().all(|b| b.is_ascii_digit()))
        .then(|| {
            let hour = raw[0..2].parse().ok()?;
            let minute = raw[2..4].parse().ok()?;
            let second = raw[4..6].parse().ok()?;
            NaiveTime::from_hms_opt(hour, minute, second)
        })
        .flatten();

    match parsed {
        Some(time) => Local::now().date_naive().and_time(time),
        None => {
            metrics::record_permissive_default("trade_time");
            Local::now().naive_local()
        }
    }
}
