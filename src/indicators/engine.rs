// =============================================================================
// Indicator Engine — rolling history + full recompute per completed candle
// =============================================================================
//
// The only state is one `RollingHistory` per (symbol, timeframe).  Every
// snapshot is computed from scratch over that history, so an identical
// ordered candle history always yields a bit-identical snapshot.
//
// Indicators whose minimum history is not met are left out of the map; no
// placeholder values are emitted.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::bollinger::calculate_bollinger;
use super::ema::latest_ema;
use super::macd::calculate_macd;
use super::rsi::current_rsi;
use super::sma::{calculate_sma, calculate_vwma};
use super::supertrend::calculate_supertrend;
use super::{atr, RollingHistory};
use crate::candles::{Candle, CandleKey, Timeframe};
use crate::runtime_config::IndicatorConfig;

/// Indicator values computed on one completed candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Bucket start of the candle that produced this snapshot.
    pub timestamp: DateTime<Utc>,
    pub indicators: BTreeMap<String, f64>,
}

pub struct IndicatorEngine {
    config: IndicatorConfig,
    histories: HashMap<CandleKey, RollingHistory>,
    snapshots_emitted: u64,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self {
            config,
            histories: HashMap::new(),
            snapshots_emitted: 0,
        }
    }

    /// Append a completed candle to its history and recompute.  Incomplete
    /// candles are ignored.
    pub fn on_candle(&mut self, candle: &Candle) -> Option<IndicatorSnapshot> {
        if !candle.is_complete {
            debug!(key = %candle.key(), "ignoring incomplete candle");
            return None;
        }

        let capacity = self.config.history_capacity;
        let history = self
            .histories
            .entry(candle.key())
            .or_insert_with(|| RollingHistory::new(capacity));
        history.push(candle);

        let indicators = compute_indicators(&self.config, history);
        self.snapshots_emitted += 1;
        trace!(
            key = %candle.key(),
            depth = history.len(),
            computed = indicators.len(),
            "indicators updated"
        );

        Some(IndicatorSnapshot {
            symbol: candle.symbol.clone(),
            timeframe: candle.timeframe,
            timestamp: candle.timestamp,
            indicators,
        })
    }

    /// Drop every history belonging to `symbol`; returns how many were held.
    pub fn remove_symbol(&mut self, symbol: &str) -> usize {
        let before = self.histories.len();
        self.histories.retain(|key, _| key.symbol != symbol);
        before - self.histories.len()
    }

    pub fn history_depth(&self, key: &CandleKey) -> usize {
        self.histories.get(key).map_or(0, RollingHistory::len)
    }

    /// History depth per `SYMBOL@tf` key.
    pub fn history_depths(&self) -> BTreeMap<String, usize> {
        self.histories
            .iter()
            .map(|(key, history)| (key.to_string(), history.len()))
            .collect()
    }

    pub fn snapshots_emitted(&self) -> u64 {
        self.snapshots_emitted
    }
}

fn put(out: &mut BTreeMap<String, f64>, name: impl Into<String>, value: Option<f64>) {
    if let Some(v) = value.filter(|v| v.is_finite()) {
        out.insert(name.into(), v);
    }
}

/// Compute the configured indicator set over `history`.
pub fn compute_indicators(config: &IndicatorConfig, history: &RollingHistory) -> BTreeMap<String, f64> {
    let closes = history.closes();
    let highs = history.highs();
    let lows = history.lows();
    let volumes = history.volumes();
    let true_ranges = history.true_ranges();

    let mut out = BTreeMap::new();

    for &period in &config.sma_periods {
        put(&mut out, format!("sma_{period}"), calculate_sma(&closes, period));
    }

    for &period in &config.ema_periods {
        match latest_ema(&closes, period) {
            Ok(v) => put(&mut out, format!("ema_{period}"), Some(v)),
            Err(e) => trace!(error = %e, "ema omitted"),
        }
    }

    put(
        &mut out,
        format!("vwma_{}", config.vwma_period),
        calculate_vwma(&closes, &volumes, config.vwma_period),
    );

    put(
        &mut out,
        format!("rsi_{}", config.rsi_period),
        current_rsi(&closes, config.rsi_period),
    );

    put(
        &mut out,
        format!("atr_{}", config.atr_period),
        atr::calculate_atr(&true_ranges, config.atr_period),
    );

    if let Some(st) = calculate_supertrend(
        &highs,
        &lows,
        &closes,
        &true_ranges,
        config.supertrend_period,
        config.supertrend_multiplier,
    ) {
        put(&mut out, "supertrend", Some(st.value));
        put(&mut out, "supertrend_direction", Some(st.direction.as_f64()));
    }

    match calculate_macd(&closes, config.macd_fast, config.macd_slow, config.macd_signal) {
        Ok(macd) => {
            put(&mut out, "macd", Some(macd.macd));
            put(&mut out, "macd_signal", macd.signal);
            put(&mut out, "macd_histogram", macd.histogram);
        }
        Err(e) => trace!(error = %e, "macd omitted"),
    }

    match calculate_bollinger(&closes, config.bollinger_period, config.bollinger_std) {
        Ok(bb) => {
            put(&mut out, "bb_upper", Some(bb.upper));
            put(&mut out, "bb_middle", Some(bb.middle));
            put(&mut out, "bb_lower", Some(bb.lower));
        }
        Err(e) => trace!(error = %e, "bollinger omitted"),
    }

    out
}
