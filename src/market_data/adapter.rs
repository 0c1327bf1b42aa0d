// =============================================================================
// Market Data Adapter — vendor session, reconnection and tick publishing
// =============================================================================
//
//   Disconnected → Connecting → Connected
//   Connected    → Reconnecting          (unexpected drop)
//   Reconnecting → Connected             (attempt succeeded)
//   Reconnecting → Error                 (max attempts exhausted; needs reset)
//
// Reconnect delay for attempt n (1-based): min(base · 2^(n-1), max).  The
// attempt counter is zeroed by any successful connect.  Every connect is
// bounded by the configured timeout and a timeout counts as a failure.
//
// A manual disconnect suppresses automatic reconnection until the next
// explicit `connect`.  It also wins over a session that was still opening:
// that session is closed again and never reaches `Connected`.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::normalize::{normalize_tick, unroll};
use super::subscriptions::SubscriptionBook;
use super::vendor::{BridgeReceiver, VendorBridge, VendorClient, VendorEvent};
use super::AdapterError;
use crate::error_recovery::{ErrorCategory, ErrorContext, ErrorHandler, ErrorRecord, ErrorSeverity};
use crate::runtime_config::{secs_to_duration, AdapterConfig};
use crate::types::{ConnectionState, Tick};

/// Name under which the adapter reports its service health.
pub const SERVICE_NAME: &str = "market_data";

/// Where a subscribe request ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Streamed on the live connection.
    Live(Vec<String>),
    /// Queued until the next successful connect.
    Pending(Vec<String>),
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterStats {
    pub state: ConnectionState,
    pub ticks_received: u64,
    pub normalize_errors: u64,
    pub dropped_events: u64,
    pub dropped_notices: u64,
    pub subscribed: usize,
    pub pending: usize,
    pub capacity: usize,
    pub last_tick_time: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
}

pub struct MarketDataAdapter<V: VendorClient> {
    config: AdapterConfig,
    vendor: V,
    errors: Arc<ErrorHandler>,
    ticks: mpsc::Sender<Tick>,
    bridge: VendorBridge,
    inbox: tokio::sync::Mutex<BridgeReceiver>,
    state: RwLock<ConnectionState>,
    subscriptions: SubscriptionBook,
    manual_disconnect: AtomicBool,
    reconnect_attempts: AtomicU32,
    ticks_received: AtomicU64,
    normalize_errors: AtomicU64,
    last_tick: RwLock<Option<DateTime<Utc>>>,
}

impl<V: VendorClient> MarketDataAdapter<V> {
    pub fn new(config: AdapterConfig, vendor: V, errors: Arc<ErrorHandler>, ticks: mpsc::Sender<Tick>) -> Self {
        let (bridge, inbox) = VendorBridge::channel(config.bridge_capacity);
        let subscriptions = SubscriptionBook::new(config.subscription_capacity);
        Self {
            config,
            vendor,
            errors,
            ticks,
            bridge,
            inbox: tokio::sync::Mutex::new(inbox),
            state: RwLock::new(ConnectionState::Disconnected),
            subscriptions,
            manual_disconnect: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            ticks_received: AtomicU64::new(0),
            normalize_errors: AtomicU64::new(0),
            last_tick: RwLock::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            info!(from = %prev, to = %next, "connection state changed");
        }
    }

    pub fn vendor(&self) -> &V {
        &self.vendor
    }

    pub fn subscriptions(&self) -> &SubscriptionBook {
        &self.subscriptions
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let cap = secs_to_duration(self.config.reconnect_max_delay_secs, Duration::MAX);
        secs_to_duration(self.config.reconnect_base_delay_secs * 2f64.powi(exp), cap)
    }

    // -------------------------------------------------------------------------
    // Connection lifecycle
    // -------------------------------------------------------------------------

    /// Open the vendor session.  A failed first attempt falls into the
    /// reconnect loop, so this resolves either `Connected` or `Error`.
    pub async fn connect(&self) -> Result<(), AdapterError> {
        match self.state() {
            ConnectionState::Error => return Err(AdapterError::ErrorState),
            ConnectionState::Connected => return Ok(()),
            state @ (ConnectionState::Connecting | ConnectionState::Reconnecting) => {
                return Err(AdapterError::InProgress(state));
            }
            ConnectionState::Disconnected => {}
        }

        self.manual_disconnect.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Connecting);

        match self.open_session().await {
            Ok(()) => self.go_live().await,
            Err(e) => {
                self.report_connect_failure(&e, 0).await;
                self.reconnect().await
            }
        }
    }

    /// Close the vendor session and stop automatic reconnection.
    pub async fn disconnect(&self) -> Result<(), AdapterError> {
        self.manual_disconnect.store(true, Ordering::SeqCst);

        match self.state() {
            ConnectionState::Disconnected => return Ok(()),
            ConnectionState::Error => {
                debug!("disconnect requested while in error state — nothing to close");
                return Ok(());
            }
            _ => {}
        }

        let result = self.vendor.disconnect().await;
        self.set_state(ConnectionState::Disconnected);
        info!("vendor disconnected (manual)");

        if let Err(e) = result {
            let err = AdapterError::from(e);
            self.report(anyhow!("vendor disconnect failed: {err}"), Some(ErrorCategory::Network), None)
                .await;
            return Err(err);
        }
        Ok(())
    }

    /// Leave the terminal `Error` state.  Returns `false` if the adapter was
    /// not in it.
    pub fn reset(&self) -> bool {
        if self.state() != ConnectionState::Error {
            return false;
        }
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.manual_disconnect.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        info!("adapter reset by operator");
        true
    }

    async fn open_session(&self) -> Result<(), AdapterError> {
        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, self.vendor.connect(self.bridge.clone())).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(AdapterError::ConnectTimeout(timeout)),
        }
    }

    /// Promote a freshly opened session to `Connected`, unless a manual
    /// disconnect landed while it was opening; then the session is closed
    /// again.
    async fn go_live(&self) -> Result<(), AdapterError> {
        if self.manual_disconnect.load(Ordering::SeqCst) {
            if let Err(e) = self.vendor.disconnect().await {
                warn!(error = %e, "failed to close session opened after manual disconnect");
            }
            self.set_state(ConnectionState::Disconnected);
            info!("session opened after manual disconnect — closed");
            return Err(AdapterError::ManuallyDisconnected);
        }
        self.on_connected().await;
        Ok(())
    }

    async fn on_connected(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        self.errors.update_service_health(SERVICE_NAME, true, None);

        if let Err(e) = self.resync_subscriptions().await {
            warn!(error = %e, "failed to restore subscriptions after connect");
            self.report(
                anyhow!("subscription restore failed: {e}"),
                Some(ErrorCategory::DataFeed),
                None,
            )
            .await;
        }
    }

    async fn reconnect(&self) -> Result<(), AdapterError> {
        self.set_state(ConnectionState::Reconnecting);
        let max_attempts = self.config.max_reconnect_attempts;

        loop {
            if self.manual_disconnect.load(Ordering::SeqCst) {
                info!("reconnect abandoned after manual disconnect");
                self.set_state(ConnectionState::Disconnected);
                return Err(AdapterError::ManuallyDisconnected);
            }

            let attempt = self.reconnect_attempts.load(Ordering::SeqCst) + 1;
            if attempt > max_attempts {
                self.set_state(ConnectionState::Error);
                let message = AdapterError::ReconnectExhausted(max_attempts).to_string();
                error!(max_attempts, "vendor reconnect exhausted — operator reset required");
                self.errors.update_service_health(SERVICE_NAME, false, Some(&message));
                self.report(anyhow!("{message}"), Some(ErrorCategory::Network), Some(ErrorSeverity::Critical))
                    .await;
                return Err(AdapterError::ReconnectExhausted(max_attempts));
            }
            self.reconnect_attempts.store(attempt, Ordering::SeqCst);

            let delay = self.backoff(attempt);
            warn!(
                attempt,
                max_attempts,
                delay_secs = delay.as_secs_f64(),
                "reconnecting to vendor"
            );
            tokio::time::sleep(delay).await;

            if self.manual_disconnect.load(Ordering::SeqCst) {
                continue;
            }

            match self.open_session().await {
                Ok(()) => {
                    info!(attempt, "vendor session reopened");
                    return self.go_live().await;
                }
                Err(e) => self.report_connect_failure(&e, attempt).await,
            }
        }
    }

    async fn report_connect_failure(&self, err: &AdapterError, attempt: u32) {
        let message = format!("vendor connect attempt {attempt} failed: {err}");
        self.errors.update_service_health(SERVICE_NAME, false, Some(&message));
        self.report(anyhow!("{message}"), Some(ErrorCategory::Network), None).await;
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Subscribe to `symbols`.  Over-capacity requests are rejected whole;
    /// while not connected the symbols are queued as pending.
    pub async fn subscribe(&self, symbols: &[String]) -> Result<SubscribeOutcome, AdapterError> {
        let live = self.state() == ConnectionState::Connected;

        let fresh = match self.subscriptions.reserve(symbols, live) {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(requested = symbols.len(), error = %e, "subscription rejected");
                self.report(anyhow!("{e}"), Some(ErrorCategory::Validation), None).await;
                return Err(e);
            }
        };

        if !live {
            info!(symbols = ?fresh, "not connected — subscription queued");
            return Ok(SubscribeOutcome::Pending(fresh));
        }
        if fresh.is_empty() {
            return Ok(SubscribeOutcome::Live(fresh));
        }

        match self.vendor.subscribe(&fresh).await {
            Ok(()) => {
                info!(symbols = ?fresh, total = self.subscriptions.len(), "subscribed");
                Ok(SubscribeOutcome::Live(fresh))
            }
            Err(e) if self.state() != ConnectionState::Connected => {
                warn!(error = %e, "connection lost during subscribe — queued as pending");
                self.subscriptions.defer(&fresh);
                Ok(SubscribeOutcome::Pending(fresh))
            }
            Err(e) => {
                self.subscriptions.rollback(&fresh);
                let err = AdapterError::from(e);
                self.report(anyhow!("vendor subscribe failed: {err}"), Some(ErrorCategory::Network), None)
                    .await;
                Err(err)
            }
        }
    }

    /// Unsubscribe `symbols`.  While not connected only local bookkeeping
    /// changes.  Returns the symbols that were live.
    pub async fn unsubscribe(&self, symbols: &[String]) -> Result<Vec<String>, AdapterError> {
        let live = self.subscriptions.remove(symbols);
        if live.is_empty() || self.state() != ConnectionState::Connected {
            debug!(symbols = ?symbols, "unsubscribe applied locally");
            return Ok(live);
        }

        if let Err(e) = self.vendor.unsubscribe(&live).await {
            let err = AdapterError::from(e);
            self.report(anyhow!("vendor unsubscribe failed: {err}"), Some(ErrorCategory::Network), None)
                .await;
            return Err(err);
        }
        info!(symbols = ?live, "unsubscribed");
        Ok(live)
    }

    /// Send one subscribe call for every subscribed and pending symbol, then
    /// clear the pending set.  Returns how many symbols were sent.
    pub async fn resync_subscriptions(&self) -> Result<usize, AdapterError> {
        if self.state() != ConnectionState::Connected {
            return Err(AdapterError::NotConnected);
        }
        let all = self.subscriptions.all();
        if all.is_empty() {
            return Ok(0);
        }

        self.vendor.subscribe(&all).await?;
        let promoted = self.subscriptions.promote_pending();
        info!(symbols = all.len(), promoted, "subscriptions restored");
        Ok(all.len())
    }

    // -------------------------------------------------------------------------
    // Event loop
    // -------------------------------------------------------------------------

    /// Drain the vendor bridge until the tick consumer goes away.
    ///
    /// A dropped connection starts the reconnect loop next to the drain, so
    /// batches already queued keep flowing while the backoff sleeps.
    pub async fn run(&self) {
        let mut inbox = self.inbox.lock().await;
        let mut recovering: Option<BoxFuture<'_, ()>> = None;
        info!("market data adapter loop started");

        loop {
            tokio::select! {
                () = async {
                    if let Some(reconnect) = recovering.as_mut() {
                        reconnect.await;
                    }
                }, if recovering.is_some() => {
                    recovering = None;
                }
                event = inbox.recv() => match event {
                    Some(VendorEvent::Ticks(batch)) => {
                        if !self.publish_batch(batch).await {
                            break;
                        }
                    }
                    Some(VendorEvent::Disconnected { reason }) => {
                        if recovering.is_some() {
                            debug!(reason = %reason, "disconnect notice while reconnecting ignored");
                        } else {
                            recovering = Some(Box::pin(self.on_vendor_disconnected(reason)));
                        }
                    }
                    Some(VendorEvent::Error { message }) => self.spawn_vendor_error(message),
                    None => break,
                },
            }
        }

        info!("market data adapter loop stopped");
    }

    /// Recovery may take a while; keep the loop moving.
    fn spawn_vendor_error(&self, message: String) {
        let errors = self.errors.clone();
        let mut context = ErrorContext::new();
        context.insert("component".into(), SERVICE_NAME.into());
        tokio::spawn(async move {
            let err = anyhow!("vendor error: {message}");
            errors
                .handle(&err, Some(ErrorCategory::DataFeed), None, Some(context))
                .await;
        });
    }

    /// Normalise and forward a vendor batch.  Returns `false` once the tick
    /// consumer has hung up.
    async fn publish_batch(&self, batch: Vec<Value>) -> bool {
        let received_at = Utc::now();

        for raw in batch.into_iter().flat_map(unroll) {
            match normalize_tick(&raw, received_at) {
                Ok(tick) => {
                    self.ticks_received.fetch_add(1, Ordering::Relaxed);
                    *self.last_tick.write() = Some(received_at);
                    trace!(symbol = %tick.symbol, ltp = tick.ltp, "tick normalised");
                    if self.ticks.send(tick).await.is_err() {
                        warn!("tick consumer closed — stopping adapter loop");
                        return false;
                    }
                }
                Err(e) => {
                    let total = self.normalize_errors.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(error = %e, total, "vendor tick rejected");
                    self.report(anyhow::Error::new(e), Some(ErrorCategory::Validation), None)
                        .await;
                }
            }
        }
        true
    }

    async fn on_vendor_disconnected(&self, reason: String) {
        if self.manual_disconnect.load(Ordering::SeqCst) || self.state() != ConnectionState::Connected {
            debug!(reason = %reason, state = %self.state(), "disconnect notification ignored");
            return;
        }

        warn!(reason = %reason, "vendor connection dropped");
        self.errors.update_service_health(SERVICE_NAME, false, Some(&reason));
        self.report(
            anyhow!("vendor connection dropped: {reason}"),
            Some(ErrorCategory::Network),
            None,
        )
        .await;

        if let Err(e) = self.reconnect().await {
            error!(error = %e, "vendor reconnect gave up");
        }
    }

    // -------------------------------------------------------------------------
    // Bookkeeping
    // -------------------------------------------------------------------------

    async fn report(
        &self,
        err: anyhow::Error,
        category: Option<ErrorCategory>,
        severity: Option<ErrorSeverity>,
    ) -> ErrorRecord {
        let mut context = ErrorContext::new();
        context.insert("component".into(), SERVICE_NAME.into());
        context.insert("state".into(), self.state().to_string());
        self.errors.handle(&err, category, severity, Some(context)).await
    }

    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            state: self.state(),
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            normalize_errors: self.normalize_errors.load(Ordering::Relaxed),
            dropped_events: self.bridge.dropped(),
            dropped_notices: self.bridge.notices_dropped(),
            subscribed: self.subscriptions.subscribed().len(),
            pending: self.subscriptions.pending().len(),
            capacity: self.subscriptions.capacity(),
            last_tick_time: *self.last_tick.read(),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::SeqCst),
        }
    }
}
