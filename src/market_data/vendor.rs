// =============================================================================
// Vendor seam — client trait and the cross-thread bridge
// =============================================================================
//
// Vendor SDKs call back from threads they own.  Those callbacks never touch
// the adapter directly: they enqueue onto a `VendorBridge` and the adapter's
// run loop dequeues.
//
// Tick batches travel over a bounded channel and are dropped (and counted)
// when it is full, so a stalled loop never blocks the vendor thread.
// Lifecycle notifications use their own bounded lane and are always
// delivered ahead of queued ticks.  A vendor that floods that lane loses the
// excess notices (counted) instead of growing memory without limit.
// =============================================================================

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::VendorError;

/// Lifecycle notices that may wait in the bridge at once.
pub const LIFECYCLE_CAPACITY: usize = 64;

/// Something a vendor thread hands to the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum VendorEvent {
    /// Raw tick payloads, one element per tick.
    Ticks(Vec<Value>),
    /// An established connection dropped.
    Disconnected { reason: String },
    /// A non-fatal vendor-side fault.
    Error { message: String },
}

/// A market-data vendor connection.
///
/// `connect` resolves once the vendor reports the session open; afterwards
/// the vendor pushes events through `bridge` until `disconnect` is called or
/// the session drops.
pub trait VendorClient: Send + Sync + 'static {
    fn connect(&self, bridge: VendorBridge) -> impl Future<Output = Result<(), VendorError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), VendorError>> + Send;

    fn subscribe(&self, symbols: &[String]) -> impl Future<Output = Result<(), VendorError>> + Send;

    fn unsubscribe(&self, symbols: &[String]) -> impl Future<Output = Result<(), VendorError>> + Send;
}

/// Sending half of the bridge; cheap to clone and safe to use from any
/// thread, inside or outside a runtime.
#[derive(Clone)]
pub struct VendorBridge {
    ticks: mpsc::Sender<Vec<Value>>,
    lifecycle: mpsc::Sender<VendorEvent>,
    dropped: Arc<AtomicU64>,
    notices_dropped: Arc<AtomicU64>,
}

/// Receiving half, owned by the adapter's run loop.
pub struct BridgeReceiver {
    ticks: mpsc::Receiver<Vec<Value>>,
    lifecycle: mpsc::Receiver<VendorEvent>,
}

impl VendorBridge {
    pub fn channel(capacity: usize) -> (VendorBridge, BridgeReceiver) {
        let (ticks_tx, ticks_rx) = mpsc::channel(capacity.max(1));
        let (life_tx, life_rx) = mpsc::channel(LIFECYCLE_CAPACITY);
        (
            VendorBridge {
                ticks: ticks_tx,
                lifecycle: life_tx,
                dropped: Arc::new(AtomicU64::new(0)),
                notices_dropped: Arc::new(AtomicU64::new(0)),
            },
            BridgeReceiver {
                ticks: ticks_rx,
                lifecycle: life_rx,
            },
        )
    }

    /// Enqueue a batch of raw ticks without blocking.  Returns `false` when
    /// the batch was dropped.
    pub fn send_ticks(&self, batch: Vec<Value>) -> bool {
        if batch.is_empty() {
            return true;
        }
        let len = batch.len() as u64;
        match self.ticks.try_send(batch) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(len, Ordering::Relaxed) + len;
                warn!(batch = len, dropped_total = total, "vendor bridge full — ticks dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(len, Ordering::Relaxed);
                debug!("vendor bridge closed — ticks discarded");
                false
            }
        }
    }

    pub fn notify_disconnected(&self, reason: impl Into<String>) -> bool {
        self.notify(VendorEvent::Disconnected {
            reason: reason.into(),
        })
    }

    pub fn notify_error(&self, message: impl Into<String>) -> bool {
        self.notify(VendorEvent::Error {
            message: message.into(),
        })
    }

    fn notify(&self, event: VendorEvent) -> bool {
        match self.lifecycle.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let total = self.notices_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(?event, dropped_total = total, "lifecycle lane full — notice dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("vendor bridge closed — notice discarded");
                false
            }
        }
    }

    /// Ticks dropped because the bridge was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Lifecycle notices dropped because their lane was full.
    pub fn notices_dropped(&self) -> u64 {
        self.notices_dropped.load(Ordering::Relaxed)
    }
}

impl BridgeReceiver {
    /// Next event, lifecycle first.  `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<VendorEvent> {
        tokio::select! {
            biased;
            Some(event) = self.lifecycle.recv() => Some(event),
            Some(batch) = self.ticks.recv() => Some(VendorEvent::Ticks(batch)),
            else => None,
        }
    }
}
