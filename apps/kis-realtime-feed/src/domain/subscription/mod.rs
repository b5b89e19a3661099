//! Subscription Registry
//!
//! Domain types for tracking which instruments the feed should be subscribed
//! to, and whether the venue has acknowledged each subscription.
//!
//! # Design
//!
//! The registry is the single source of truth for desired subscriptions:
//! - A symbol present in the registry is desired, whatever its ack state
//! - Removal is immediate on unsubscribe, independent of the venue's reply
//! - Reconciliation resets every entry to pending and replays the full set
//!
//! The registry never performs I/O. Callers translate the changes it reports
//! into wire commands.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::Serialize;

// =============================================================================
// Symbol
// =============================================================================

/// Number of ASCII digits in a venue instrument code.
pub const SYMBOL_LENGTH: usize = 6;

/// Symbol validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// The input is not exactly six ASCII digits.
    #[error("invalid symbol '{0}': expected {SYMBOL_LENGTH} ASCII digits")]
    InvalidSymbol(String),
}

/// Venue instrument code, always six ASCII digits.
///
/// Can only be constructed through [`Symbol::parse`], so every `Symbol` in the
/// system is valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Validate and wrap an instrument code.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError::InvalidSymbol`] unless the input is exactly six
    /// ASCII digits. Surrounding whitespace is not trimmed.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        if raw.len() == SYMBOL_LENGTH && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(SymbolError::InvalidSymbol(raw.to_string()))
        }
    }

    /// Borrow the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Requests and Ack State
// =============================================================================

/// Desired subscription state carried by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DesiredState {
    /// The symbol should be streamed.
    Subscribed,
    /// The symbol should no longer be streamed.
    Unsubscribed,
}

/// A single change to the desired subscription set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionRequest {
    /// Instrument the request refers to.
    pub symbol: Symbol,
    /// Target state.
    pub desired: DesiredState,
}

impl SubscriptionRequest {
    /// Create a subscribe request.
    #[must_use]
    pub const fn subscribe(symbol: Symbol) -> Self {
        Self {
            symbol,
            desired: DesiredState::Subscribed,
        }
    }

    /// Create an unsubscribe request.
    #[must_use]
    pub const fn unsubscribe(symbol: Symbol) -> Self {
        Self {
            symbol,
            desired: DesiredState::Unsubscribed,
        }
    }
}

/// Venue acknowledgement state of a desired subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckState {
    /// Sent (or about to be sent) but not yet acknowledged.
    #[default]
    Pending,
    /// The venue replied with a successful subscribe ack.
    Confirmed,
}

// =============================================================================
// Subscription Registry
// =============================================================================

/// Thread-safe set of desired subscriptions with their ack state.
///
/// # Example
///
/// ```rust
/// use kis_realtime_feed::domain::subscription::{AckState, Symbol, SubscriptionRegistry};
///
/// let registry = SubscriptionRegistry::new();
///
/// assert!(registry.add("005930").unwrap());
/// assert!(!registry.add("005930").unwrap());
///
/// let samsung = Symbol::parse("005930").unwrap();
/// assert!(registry.confirm(&samsung));
/// assert_eq!(registry.ack_state(&samsung), Some(AckState::Confirmed));
///
/// // Replay after a reconnect puts everything back to pending
/// let replay = registry.begin_reconciliation();
/// assert_eq!(replay.len(), 1);
/// assert_eq!(registry.ack_state(&samsung), Some(AckState::Pending));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<BTreeMap<Symbol, AckState>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a symbol.
    ///
    /// Returns `true` if the symbol was not already present.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError`] if the input is not a valid symbol.
    pub fn add(&self, raw: &str) -> Result<bool, SymbolError> {
        Ok(self.add_symbol(Symbol::parse(raw)?))
    }

    /// Add an already validated symbol. Returns `true` if it was new.
    pub fn add_symbol(&self, symbol: Symbol) -> bool {
        let mut entries = self.entries.write();
        if entries.contains_key(&symbol) {
            return false;
        }
        entries.insert(symbol, AckState::Pending);
        true
    }

    /// Remove a symbol. Returns `true` if it was present.
    pub fn remove(&self, symbol: &Symbol) -> bool {
        self.entries.write().remove(symbol).is_some()
    }

    /// Apply a subscription request. Returns `true` if the set changed.
    pub fn apply(&self, request: &SubscriptionRequest) -> bool {
        match request.desired {
            DesiredState::Subscribed => self.add_symbol(request.symbol.clone()),
            DesiredState::Unsubscribed => self.remove(&request.symbol),
        }
    }

    /// Check whether a symbol is desired.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.entries.read().contains_key(symbol)
    }

    /// Snapshot of the desired symbols, in code order.
    #[must_use]
    pub fn list(&self) -> Vec<Symbol> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of desired symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if nothing is desired.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Mark a desired symbol as acknowledged by the venue.
    ///
    /// Returns `false` if the symbol is not desired (for example it was
    /// unsubscribed before the ack arrived).
    pub fn confirm(&self, symbol: &Symbol) -> bool {
        match self.entries.write().get_mut(symbol) {
            Some(state) => {
                *state = AckState::Confirmed;
                true
            }
            None => false,
        }
    }

    /// Ack state of a symbol, if desired.
    #[must_use]
    pub fn ack_state(&self, symbol: &Symbol) -> Option<AckState> {
        self.entries.read().get(symbol).copied()
    }

    /// Start a reconciliation pass after a (re)connect.
    ///
    /// Resets every entry to [`AckState::Pending`] and returns one subscribe
    /// request per desired symbol. This is a full replay, not a diff: a fresh
    /// session has no server-side subscriptions.
    pub fn begin_reconciliation(&self) -> Vec<SubscriptionRequest> {
        let mut entries = self.entries.write();
        entries
            .iter_mut()
            .map(|(symbol, state)| {
                *state = AckState::Pending;
                SubscriptionRequest::subscribe(symbol.clone())
            })
            .collect()
    }

    /// Count entries by ack state.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let entries = self.entries.read();
        let confirmed = entries
            .values()
            .filter(|state| **state == AckState::Confirmed)
            .count();
        RegistryStats {
            pending: entries.len() - confirmed,
            confirmed,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Entries awaiting a venue ack.
    pub pending: usize,
    /// Entries acknowledged by the venue.
    pub confirmed: usize,
}

impl RegistryStats {
    /// Total number of desired symbols.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.confirmed
    }
}

// =============================================================================
// Tests
// =============================================================================
