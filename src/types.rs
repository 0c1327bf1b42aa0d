// =============================================================================
// Shared types used across the Aurora data plane
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical market-data update for one symbol, produced by the adapter from
/// whatever shape the vendor delivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    /// Last traded price.
    pub ltp: f64,
    #[serde(default)]
    pub bid: f64,
    #[serde(default)]
    pub ask: f64,
    #[serde(default)]
    pub bid_qty: f64,
    #[serde(default)]
    pub ask_qty: f64,
    #[serde(default)]
    pub volume: f64,
    /// Open interest, carried through untouched.
    #[serde(default)]
    pub oi: f64,
    pub timestamp: DateTime<Utc>,
    /// Exchange-side timestamp when the vendor supplies a parseable one.
    #[serde(default)]
    pub exchange_timestamp: Option<DateTime<Utc>>,
    /// Absolute change against the previous close (0 when unknown).
    #[serde(default)]
    pub change: f64,
    #[serde(default)]
    pub change_pct: f64,
}

impl Tick {
    /// Minimal tick used by the candle engine and tests: price, volume and
    /// time, everything else zero.
    pub fn new(symbol: impl Into<String>, ltp: f64, volume: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            ltp,
            bid: 0.0,
            ask: 0.0,
            bid_qty: 0.0,
            ask_qty: 0.0,
            volume,
            oi: 0.0,
            timestamp,
            exchange_timestamp: None,
            change: 0.0,
            change_pct: 0.0,
        }
    }
}

/// Connection lifecycle of a single market-data adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted; needs an operator to reset.
    Error,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
            Self::Error => write!(f, "Error"),
        }
    }
}
