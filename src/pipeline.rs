// =============================================================================
// Data Plane — single processing loop for ticks, candles and indicators
// =============================================================================
//
// One task owns the candle engine and the indicator engine, so every
// (symbol, timeframe) key has exactly one writer and needs no locking.
// Collaborators talk to it through `DataPlaneHandle` commands.
//
// Every tick is published.  Ticks of tracked symbols then fold into candles,
// and for each completed candle (base first, higher timeframes after) the
// loop publishes the candle, recomputes indicators and publishes the
// snapshot.  Subscription and tracking are independent: a subscribed symbol
// that is not tracked still reaches tick consumers.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::candles::{Candle, CandleEngine};
use crate::error_recovery::{ErrorCategory, ErrorContext, ErrorHandler};
use crate::events::{EventPublisher, MarketEvent};
use crate::indicators::IndicatorEngine;
use crate::runtime_config::{CandleConfig, IndicatorConfig};
use crate::types::Tick;

const COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("data plane loop is not running")]
    Closed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub ticks_processed: u64,
    /// Ticks published without candle aggregation (symbol not tracked).
    pub ticks_untracked: u64,
    pub stale_ticks: u64,
    pub candles_completed: u64,
    pub snapshots_emitted: u64,
    pub invalid_candles: u64,
    pub tracked_symbols: Vec<String>,
    pub open_candles: usize,
    /// Indicator history depth per `SYMBOL@tf`.
    pub history_depth: BTreeMap<String, usize>,
}

enum Command {
    AddSymbol(String, oneshot::Sender<bool>),
    RemoveSymbol(String, oneshot::Sender<usize>),
    Stats(oneshot::Sender<PipelineStats>),
    Shutdown(oneshot::Sender<usize>),
}

pub struct DataPlane {
    candles: CandleEngine,
    indicators: IndicatorEngine,
    publisher: EventPublisher,
    errors: Arc<ErrorHandler>,
    ticks: mpsc::Receiver<Tick>,
    commands: mpsc::Receiver<Command>,
    ticks_processed: u64,
    ticks_untracked: u64,
    invalid_candles: u64,
}

/// Cloneable control surface onto a running [`DataPlane`].
#[derive(Clone)]
pub struct DataPlaneHandle {
    commands: mpsc::Sender<Command>,
}

impl DataPlane {
    pub fn new(
        candle_config: &CandleConfig,
        indicator_config: IndicatorConfig,
        publisher: EventPublisher,
        errors: Arc<ErrorHandler>,
        ticks: mpsc::Receiver<Tick>,
    ) -> (Self, DataPlaneHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let plane = Self {
            candles: CandleEngine::new(candle_config),
            indicators: IndicatorEngine::new(indicator_config),
            publisher,
            errors,
            ticks,
            commands: cmd_rx,
            ticks_processed: 0,
            ticks_untracked: 0,
            invalid_candles: 0,
        };
        (plane, DataPlaneHandle { commands: cmd_tx })
    }

    /// Process until shut down through the handle or until the tick source
    /// closes.  Both paths force-complete every open candle first.
    pub async fn run(mut self) {
        info!(timeframes = ?self.candles.timeframes(), "data plane started");

        loop {
            tokio::select! {
                tick = self.ticks.recv() => match tick {
                    Some(tick) => self.process_tick(&tick).await,
                    None => {
                        info!("tick source closed");
                        self.force_complete().await;
                        break;
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(Command::AddSymbol(symbol, reply)) => {
                        let _ = reply.send(self.add_symbol(&symbol));
                    }
                    Some(Command::RemoveSymbol(symbol, reply)) => {
                        let _ = reply.send(self.remove_symbol(&symbol).await);
                    }
                    Some(Command::Stats(reply)) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(Command::Shutdown(reply)) => {
                        while let Ok(tick) = self.ticks.try_recv() {
                            self.process_tick(&tick).await;
                        }
                        let flushed = self.force_complete().await;
                        let _ = reply.send(flushed);
                        break;
                    }
                    // Every handle dropped; keep serving ticks.
                    None => {
                        while let Some(tick) = self.ticks.recv().await {
                            self.process_tick(&tick).await;
                        }
                        self.force_complete().await;
                        break;
                    }
                },
            }
        }

        info!(
            ticks = self.ticks_processed,
            candles = self.candles.candles_completed(),
            "data plane stopped"
        );
    }

    pub fn add_symbol(&mut self, symbol: &str) -> bool {
        let added = self.candles.add_symbol(symbol);
        if added {
            info!(symbol = %symbol, "tracking symbol");
        }
        added
    }

    /// Stop tracking `symbol`: its open candles are completed and published,
    /// then its indicator history is dropped.  Returns the flushed count.
    pub async fn remove_symbol(&mut self, symbol: &str) -> usize {
        let flushed = self.candles.remove_symbol(symbol);
        let count = flushed.len();
        for candle in flushed {
            self.emit_candle(candle).await;
        }
        let histories = self.indicators.remove_symbol(symbol);
        info!(symbol = %symbol, flushed = count, histories, "symbol untracked");
        count
    }

    pub async fn process_tick(&mut self, tick: &Tick) {
        self.ticks_processed += 1;
        self.publisher.publish(MarketEvent::from(tick));

        if !self.candles.is_tracked(&tick.symbol) {
            self.ticks_untracked += 1;
            trace!(symbol = %tick.symbol, "tick for untracked symbol not aggregated");
            return;
        }

        for candle in self.candles.on_tick(tick) {
            self.emit_candle(candle).await;
        }
    }

    /// Complete and publish every open candle.  Returns how many were emitted.
    pub async fn force_complete(&mut self) -> usize {
        let completed = self.candles.force_complete_all();
        let count = completed.len();
        for candle in completed {
            self.emit_candle(candle).await;
        }
        info!(count, "open candles force-completed");
        count
    }

    async fn emit_candle(&mut self, candle: Candle) {
        if !candle.is_valid() {
            self.invalid_candles += 1;
            warn!(key = %candle.key(), "completed candle failed OHLC validation");
            let mut context = ErrorContext::new();
            context.insert("key".into(), candle.key().to_string());
            context.insert("bucket".into(), candle.timestamp.to_rfc3339());
            let err = anyhow::anyhow!(
                "invalid candle o={} h={} l={} c={}",
                candle.open,
                candle.high,
                candle.low,
                candle.close
            );
            self.errors
                .handle(&err, Some(ErrorCategory::Validation), None, Some(context))
                .await;
        }

        debug!(
            key = %candle.key(),
            bucket = %candle.timestamp,
            close = candle.close,
            ticks = candle.tick_count,
            "candle completed"
        );
        self.publisher.publish(MarketEvent::from(&candle));

        if let Some(snapshot) = self.indicators.on_candle(&candle) {
            self.publisher.publish(MarketEvent::from(snapshot));
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            ticks_processed: self.ticks_processed,
            ticks_untracked: self.ticks_untracked,
            stale_ticks: self.candles.stale_ticks(),
            candles_completed: self.candles.candles_completed(),
            snapshots_emitted: self.indicators.snapshots_emitted(),
            invalid_candles: self.invalid_candles,
            tracked_symbols: self.candles.tracked_symbols(),
            open_candles: self.candles.open_candles(),
            history_depth: self.indicators.history_depths(),
        }
    }
}

impl DataPlaneHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, PipelineError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await.map_err(|_| PipelineError::Closed)?;
        rx.await.map_err(|_| PipelineError::Closed)
    }

    /// Start building candles and indicators for `symbol`.
    pub async fn add_symbol(&self, symbol: impl Into<String>) -> Result<bool, PipelineError> {
        let symbol = symbol.into();
        self.request(|tx| Command::AddSymbol(symbol, tx)).await
    }

    pub async fn remove_symbol(&self, symbol: impl Into<String>) -> Result<usize, PipelineError> {
        let symbol = symbol.into();
        self.request(|tx| Command::RemoveSymbol(symbol, tx)).await
    }

    pub async fn stats(&self) -> Result<PipelineStats, PipelineError> {
        self.request(Command::Stats).await
    }

    /// Force-complete open candles and stop the loop.  Returns how many
    /// candles were flushed.
    pub async fn shutdown(&self) -> Result<usize, PipelineError> {
        self.request(Command::Shutdown).await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::Timeframe;
    use crate::runtime_config::ErrorRecoveryConfig;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 4, 0, 0).unwrap()
    }

    fn plane() -> (DataPlane, DataPlaneHandle, mpsc::Sender<Tick>, EventPublisher) {
        let publisher = EventPublisher::new(1024);
        let (tx, rx) = mpsc::channel(256);
        let errors = Arc::new(ErrorHandler::new(&ErrorRecoveryConfig::default()));
        let (p, h) = DataPlane::new(
            &CandleConfig::default(),
            IndicatorConfig::default(),
            publisher.clone(),
            errors,
            rx,
        );
        (p, h, tx, publisher)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<MarketEvent>) -> Vec<MarketEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn untracked_ticks_are_published_but_not_aggregated() {
        let (mut p, _h, _tx, publisher) = plane();
        let mut rx = publisher.subscribe();
        p.process_tick(&Tick::new("X", 1.0, 1.0, t0())).await;
        p.process_tick(&Tick::new("X", 2.0, 1.0, t0() + Duration::minutes(1))).await;

        let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["tick", "tick"]);
        let stats = p.stats();
        assert_eq!(stats.ticks_processed, 2);
        assert_eq!(stats.ticks_untracked, 2);
        assert_eq!(stats.open_candles, 0);
    }

    #[tokio::test]
    async fn bucket_rollover_publishes_candle_then_indicators() {
        let (mut p, _h, _tx, publisher) = plane();
        let mut rx = publisher.subscribe();
        p.add_symbol("X");

        p.process_tick(&Tick::new("X", 10.0, 1.0, t0())).await;
        p.process_tick(&Tick::new("X", 12.0, 2.0, t0() + Duration::seconds(30))).await;
        p.process_tick(&Tick::new("X", 11.0, 1.0, t0() + Duration::seconds(61))).await;

        let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec!["tick", "tick", "tick", "candle_completed", "indicator_updated"]
        );

        let stats = p.stats();
        assert_eq!(stats.ticks_processed, 3);
        assert_eq!(stats.candles_completed, 1);
        assert_eq!(stats.history_depth.get("X@1m"), Some(&1));
    }

    #[tokio::test]
    async fn remove_symbol_flushes_open_candles() {
        let (mut p, _h, _tx, publisher) = plane();
        let mut rx = publisher.subscribe();
        p.add_symbol("X");
        p.process_tick(&Tick::new("X", 10.0, 1.0, t0())).await;
        p.process_tick(&Tick::new("X", 11.0, 1.0, t0() + Duration::minutes(1))).await;
        drain(&mut rx);

        // open: 1m (second bucket) and every higher timeframe
        let open = p.stats().open_candles;
        let flushed = p.remove_symbol("X").await;
        assert_eq!(flushed, open);
        let candles = drain(&mut rx)
            .into_iter()
            .filter(|e| e.kind() == "candle_completed")
            .count();
        assert_eq!(candles, flushed);
        assert!(p.stats().history_depth.is_empty());
        assert!(p.stats().tracked_symbols.is_empty());
    }

    #[tokio::test]
    async fn handle_drives_running_loop() {
        let (p, h, tx, publisher) = plane();
        let mut rx = publisher.subscribe();
        let task = tokio::spawn(p.run());

        assert!(h.add_symbol("X").await.unwrap());
        assert!(!h.add_symbol("X").await.unwrap());

        for i in 0..3 {
            tx.send(Tick::new("X", 100.0 + i as f64, 1.0, t0() + Duration::minutes(i)))
                .await
                .unwrap();
        }

        // 1m (last bucket), 5m, 15m, 30m, 1h and 1D are still open.
        assert_eq!(h.shutdown().await.unwrap(), 6);
        task.await.unwrap();

        let completed: Vec<MarketEvent> = drain(&mut rx)
            .into_iter()
            .filter(|e| e.kind() == "candle_completed")
            .collect();
        assert_eq!(completed.len(), 2 + 6);
        assert!(completed.iter().any(|e| matches!(
            e,
            MarketEvent::CandleCompleted { timeframe: Timeframe::D1, is_complete: true, .. }
        )));

        assert!(matches!(h.stats().await, Err(PipelineError::Closed)));
    }
}
