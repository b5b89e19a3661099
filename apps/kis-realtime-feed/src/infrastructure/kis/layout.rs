//! Pipe-delimited tick record layout.
//!
//! Field positions within one `H0STCNT0` record, counted from zero. Records
//! are `^`-joined and concatenated; the frame header says how many there are.

/// Instrument code.
pub const SYMBOL: usize = 0;
/// Trade time `HHMMSS`.
pub const TRADE_TIME: usize = 1;
/// Current price.
pub const PRICE: usize = 2;
/// Change sign code.
pub const CHANGE_SIGN: usize = 3;
/// Change against the previous close.
pub const PRICE_CHANGE: usize = 4;
/// Change rate in percent.
pub const CHANGE_RATE: usize = 5;
/// Session open.
pub const OPEN_PRICE: usize = 7;
/// Session high.
pub const HIGH_PRICE: usize = 8;
/// Session low.
pub const LOW_PRICE: usize = 9;
/// Best ask.
pub const BEST_ASK: usize = 10;
/// Best bid.
pub const BEST_BID: usize = 11;
/// Trade volume.
pub const VOLUME: usize = 12;
/// Cumulative volume.
pub const TOTAL_VOLUME: usize = 13;

/// Fields per record when the header count does not divide the field list.
pub const DEFAULT_RECORD_WIDTH: usize = 46;

/// Shortest record that still addresses every field above.
pub const MIN_RECORD_WIDTH: usize = TOTAL_VOLUME + 1;

/// Length of an `HHMMSS` time field.
pub const TRADE_TIME_LENGTH: usize = 6;

/// Sign codes meaning the price rose (limit-up, up).
pub const RISE_CODES: [&str; 2] = ["1", "2"];

/// Sign codes meaning the price fell (limit-down, down).
pub const FALL_CODES: [&str; 2] = ["4", "5"];

/// Separator between frame header sections.
pub const SECTION_SEPARATOR: char = '|';

/// Separator between fields.
pub const FIELD_SEPARATOR: char = '^';

/// Encrypted flag value of a plaintext frame.
pub const PLAINTEXT_FLAG: &str = "0";
