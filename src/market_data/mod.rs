// =============================================================================
// Market Data Ingestion
// =============================================================================
//
// Vendor connection lifecycle, payload normalisation and subscription
// bookkeeping.  Vendor code runs on threads the adapter does not own and hands
// everything to it through a `VendorBridge`.

pub mod adapter;
pub mod normalize;
pub mod subscriptions;
pub mod vendor;
pub mod ws_vendor;

use std::time::Duration;

use thiserror::Error;

pub use adapter::{AdapterStats, MarketDataAdapter, SubscribeOutcome};
pub use subscriptions::SubscriptionBook;
pub use vendor::{BridgeReceiver, VendorBridge, VendorClient, VendorEvent};
pub use ws_vendor::WebSocketVendor;

/// Faults raised by a vendor client implementation.
#[derive(Debug, Error)]
pub enum VendorError {
    #[error("vendor connect failed: {0}")]
    Connect(String),

    #[error("vendor connection is not open")]
    NotConnected,

    #[error("vendor request failed: {0}")]
    Request(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("subscription rejected: {current} active + {requested} requested exceeds capacity {capacity}")]
    CapacityExceeded {
        current: usize,
        requested: usize,
        capacity: usize,
    },

    #[error("vendor connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    #[error("adapter is in the error state; reset required")]
    ErrorState,

    #[error("adapter is not connected")]
    NotConnected,

    #[error("connection attempt already in progress ({0})")]
    InProgress(crate::types::ConnectionState),

    #[error("reconnect abandoned after manual disconnect")]
    ManuallyDisconnected,

    #[error(transparent)]
    Vendor(#[from] VendorError),
}

/// Why a single vendor payload could not become a `Tick`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("tick payload is not a JSON object")]
    NotAnObject,

    #[error("tick payload has no symbol")]
    MissingSymbol,

    #[error("tick for {symbol}: non-finite {field}")]
    NonFinite { symbol: String, field: &'static str },
}
