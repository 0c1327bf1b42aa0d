// =============================================================================
// Candle Engine — tick → multi-timeframe OHLCV aggregation
// =============================================================================
//
// Exactly one open candle exists per (symbol, timeframe).  Only the base
// timeframe sees raw ticks; every higher timeframe is built by merging
// completed base candles, so memory stays bounded regardless of history.
//
// Per tick on the base timeframe:
//   same bucket  → fold the tick into the open candle
//   newer bucket → complete + emit the open candle, merge it upward, close any
//                  higher-timeframe candle whose bucket the new tick leaves,
//                  then open a fresh base candle seeded by the tick
//   older bucket → stale, dropped
//
// Open/close depend on arrival order within a bucket; out-of-order delivery
// inside one bucket is folded as received and not corrected.
// =============================================================================

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveTime, Utc};
use tracing::{debug, trace, warn};

use super::{Candle, CandleKey, Timeframe};
use crate::runtime_config::CandleConfig;
use crate::types::Tick;

pub struct CandleEngine {
    base: Timeframe,
    /// Higher timeframes, shortest first.
    higher: Vec<Timeframe>,
    market_open: NaiveTime,
    tracked: BTreeSet<String>,
    open: HashMap<CandleKey, Candle>,
    candles_completed: u64,
    stale_ticks: u64,
}

impl CandleEngine {
    pub fn new(config: &CandleConfig) -> Self {
        let base = config.base_timeframe;
        let mut higher: Vec<Timeframe> = Vec::new();
        for &tf in &config.timeframes {
            if tf == base || higher.contains(&tf) {
                continue;
            }
            if tf.is_multiple_of(base) {
                higher.push(tf);
            } else {
                warn!(
                    timeframe = %tf,
                    base = %base,
                    "timeframe is not a multiple of the base timeframe — skipped"
                );
            }
        }
        higher.sort();

        Self {
            base,
            higher,
            market_open: config.market_open_utc,
            tracked: BTreeSet::new(),
            open: HashMap::new(),
            candles_completed: 0,
            stale_ticks: 0,
        }
    }

    pub fn base_timeframe(&self) -> Timeframe {
        self.base
    }

    /// Base timeframe followed by every higher timeframe.
    pub fn timeframes(&self) -> Vec<Timeframe> {
        std::iter::once(self.base).chain(self.higher.iter().copied()).collect()
    }

    pub fn add_symbol(&mut self, symbol: &str) -> bool {
        self.tracked.insert(symbol.to_string())
    }

    /// Stop tracking `symbol`, force-completing whatever it still has open.
    pub fn remove_symbol(&mut self, symbol: &str) -> Vec<Candle> {
        if !self.tracked.remove(symbol) {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.force_complete_symbol(symbol, &mut out);
        out
    }

    pub fn is_tracked(&self, symbol: &str) -> bool {
        self.tracked.contains(symbol)
    }

    pub fn tracked_symbols(&self) -> Vec<String> {
        self.tracked.iter().cloned().collect()
    }

    pub fn open_candle(&self, key: &CandleKey) -> Option<&Candle> {
        self.open.get(key)
    }

    pub fn open_candles(&self) -> usize {
        self.open.len()
    }

    pub fn candles_completed(&self) -> u64 {
        self.candles_completed
    }

    pub fn stale_ticks(&self) -> u64 {
        self.stale_ticks
    }

    /// Fold `tick` in and return every candle it completed, base timeframe
    /// first.  Ticks for untracked symbols are ignored.
    pub fn on_tick(&mut self, tick: &Tick) -> Vec<Candle> {
        let mut completed = Vec::new();
        if !self.tracked.contains(&tick.symbol) {
            return completed;
        }

        let bucket = self.base.bucket_start(tick.timestamp, self.market_open);
        let key = CandleKey::new(tick.symbol.clone(), self.base);

        if let Some(current) = self.open.get_mut(&key) {
            if bucket == current.timestamp {
                current.apply_tick(tick);
                trace!(key = %key, ltp = tick.ltp, ticks = current.tick_count, "tick folded");
                return completed;
            }
            if bucket < current.timestamp {
                self.stale_ticks += 1;
                debug!(
                    key = %key,
                    tick_time = %tick.timestamp,
                    open_bucket = %current.timestamp,
                    "stale tick for an already closed bucket — dropped"
                );
                return completed;
            }
        }

        if let Some(done) = self.open.remove(&key) {
            let done = done.complete();
            self.candles_completed += 1;
            completed.push(done.clone());
            self.roll_up(&done, Some(tick.timestamp), true, &mut completed);
        }

        self.open.insert(key, Candle::from_tick(tick, self.base, bucket));
        completed
    }

    /// Finalise every open candle (shutdown path).  Candles are emitted even
    /// though their bucket has not ended; nothing with data is dropped.
    pub fn force_complete_all(&mut self) -> Vec<Candle> {
        let symbols: Vec<String> = self.tracked.iter().cloned().collect();
        let mut out = Vec::new();
        for symbol in &symbols {
            self.force_complete_symbol(symbol, &mut out);
        }
        // Untracked leftovers cannot exist, but never leave data behind.
        let mut leftovers: Vec<CandleKey> = self.open.keys().cloned().collect();
        leftovers.sort();
        for key in leftovers {
            if let Some(candle) = self.open.remove(&key) {
                self.emit_forced(candle, &mut out);
            }
        }
        out
    }

    fn force_complete_symbol(&mut self, symbol: &str, out: &mut Vec<Candle>) {
        let base_key = CandleKey::new(symbol, self.base);
        if let Some(base) = self.open.remove(&base_key) {
            if base.tick_count > 0 {
                let done = base.complete();
                self.candles_completed += 1;
                out.push(done.clone());
                // Only merge into higher candles that are already open, so the
                // number of emitted candles equals the number that were open.
                self.roll_up(&done, None, false, out);
            }
        }

        for tf in self.higher.clone() {
            if let Some(candle) = self.open.remove(&CandleKey::new(symbol, tf)) {
                self.emit_forced(candle, out);
            }
        }
    }

    fn emit_forced(&mut self, candle: Candle, out: &mut Vec<Candle>) {
        if candle.tick_count == 0 {
            return;
        }
        self.candles_completed += 1;
        debug!(key = %candle.key(), bucket = %candle.timestamp, "candle force-completed");
        out.push(candle.complete());
    }

    /// Merge a completed base candle into every higher timeframe, then close
    /// the higher candles whose bucket `next_tick` has left.
    fn roll_up(
        &mut self,
        done: &Candle,
        next_tick: Option<DateTime<Utc>>,
        open_missing: bool,
        out: &mut Vec<Candle>,
    ) {
        for &tf in &self.higher {
            let key = CandleKey::new(done.symbol.clone(), tf);
            let bucket = tf.bucket_start(done.timestamp, self.market_open);

            match self.open.get_mut(&key) {
                Some(parent) if parent.timestamp == bucket => parent.merge(done),
                Some(_) => {
                    // Parent belongs to an older bucket; close it first.
                    if let Some(old) = self.open.remove(&key) {
                        self.candles_completed += 1;
                        out.push(old.complete());
                    }
                    if open_missing {
                        self.open.insert(key.clone(), Candle::from_child(done, tf, bucket));
                    }
                }
                None if open_missing => {
                    self.open.insert(key.clone(), Candle::from_child(done, tf, bucket));
                }
                None => {}
            }

            if let Some(next) = next_tick {
                if tf.bucket_start(next, self.market_open) != bucket {
                    if let Some(parent) = self.open.remove(&key) {
                        self.candles_completed += 1;
                        debug!(
                            key = %key,
                            bucket = %parent.timestamp,
                            close = parent.close,
                            "higher-timeframe candle completed"
                        );
                        out.push(parent.complete());
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 4, 0, 0).unwrap()
    }

    fn engine(timeframes: Vec<Timeframe>) -> CandleEngine {
        let cfg = CandleConfig {
            base_timeframe: Timeframe::M1,
            timeframes,
            ..CandleConfig::default()
        };
        let mut e = CandleEngine::new(&cfg);
        e.add_symbol("X");
        e
    }

    fn tick_at(secs: i64, price: f64, volume: f64) -> Tick {
        Tick::new("X", price, volume, t0() + Duration::seconds(secs))
    }

    #[test]
    fn untracked_symbol_is_ignored() {
        let mut e = engine(vec![Timeframe::M1]);
        let t = Tick::new("Y", 10.0, 1.0, t0());
        assert!(e.on_tick(&t).is_empty());
        assert_eq!(e.open_candles(), 0);
    }

    #[test]
    fn new_bucket_completes_previous_candle() {
        let mut e = engine(vec![Timeframe::M1]);
        assert!(e.on_tick(&tick_at(0, 100.0, 1.0)).is_empty());
        assert!(e.on_tick(&tick_at(30, 101.0, 1.0)).is_empty());
        let done = e.on_tick(&tick_at(60, 102.0, 1.0));

        assert_eq!(done.len(), 1);
        assert!(done[0].is_complete);
        assert_eq!(done[0].timestamp, t0());
        assert_eq!(done[0].open, 100.0);
        assert_eq!(done[0].close, 101.0);
        assert_eq!(done[0].tick_count, 2);

        let open = e.open_candle(&CandleKey::new("X", Timeframe::M1)).unwrap();
        assert_eq!(open.timestamp, t0() + Duration::minutes(1));
        assert_eq!(open.open, 102.0);
    }

    #[test]
    fn stale_tick_is_dropped() {
        let mut e = engine(vec![Timeframe::M1]);
        e.on_tick(&tick_at(60, 100.0, 1.0));
        assert!(e.on_tick(&tick_at(10, 1.0, 1.0)).is_empty());
        assert_eq!(e.stale_ticks(), 1);
        let open = e.open_candle(&CandleKey::new("X", Timeframe::M1)).unwrap();
        assert_eq!(open.low, 100.0);
    }

    #[test]
    fn out_of_order_within_bucket_changes_open_close_only() {
        let mut a = engine(vec![Timeframe::M1]);
        let mut b = engine(vec![Timeframe::M1]);
        for t in [tick_at(1, 10.0, 1.0), tick_at(2, 12.0, 1.0), tick_at(3, 9.0, 1.0)] {
            a.on_tick(&t);
        }
        for t in [tick_at(3, 9.0, 1.0), tick_at(1, 10.0, 1.0), tick_at(2, 12.0, 1.0)] {
            b.on_tick(&t);
        }
        let ca = a.force_complete_all().remove(0);
        let cb = b.force_complete_all().remove(0);
        assert_eq!((ca.high, ca.low, ca.volume), (cb.high, cb.low, cb.volume));
        assert_ne!(ca.open, cb.open);
        assert_ne!(ca.close, cb.close);
    }

    #[test]
    fn higher_timeframe_merges_base_candles() {
        let mut e = engine(vec![Timeframe::M1, Timeframe::M5]);
        let mut emitted = Vec::new();
        // Minutes 0..=4 each with two ticks, then a tick in minute 5.
        for m in 0..5 {
            emitted.extend(e.on_tick(&tick_at(m * 60, 100.0 + m as f64, 1.0)));
            emitted.extend(e.on_tick(&tick_at(m * 60 + 30, 99.0 - m as f64, 2.0)));
        }
        emitted.extend(e.on_tick(&tick_at(300, 200.0, 1.0)));

        let five: Vec<&Candle> = emitted.iter().filter(|c| c.timeframe == Timeframe::M5).collect();
        let ones = emitted.iter().filter(|c| c.timeframe == Timeframe::M1).count();
        assert_eq!(ones, 5);
        assert_eq!(five.len(), 1);
        let c = five[0];
        assert_eq!(c.timestamp, t0());
        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 104.0);
        assert_eq!(c.low, 95.0);
        assert_eq!(c.close, 95.0);
        assert_eq!(c.volume, 15.0);
        assert_eq!(c.tick_count, 10);
        assert!(c.is_complete);
        assert!(c.is_valid());

        // The base candle is emitted before the higher candle it completes.
        let last_base = emitted.iter().rposition(|c| c.timeframe == Timeframe::M1).unwrap();
        let higher = emitted.iter().position(|c| c.timeframe == Timeframe::M5).unwrap();
        assert!(last_base < higher);
    }

    #[test]
    fn gap_in_data_closes_higher_candle() {
        let mut e = engine(vec![Timeframe::M1, Timeframe::M5]);
        e.on_tick(&tick_at(0, 100.0, 1.0));
        // Next tick two hours later.
        let done = e.on_tick(&tick_at(7200, 101.0, 1.0));
        assert_eq!(done.len(), 2);
        assert_eq!(done[0].timeframe, Timeframe::M1);
        assert_eq!(done[1].timeframe, Timeframe::M5);
        assert_eq!(done[1].timestamp, t0());
    }

    #[test]
    fn forced_completion_emits_every_open_candle() {
        let mut e = engine(Timeframe::ALL.to_vec());
        e.add_symbol("Y");
        for m in 0..7 {
            e.on_tick(&tick_at(m * 60, 100.0, 1.0));
            e.on_tick(&Tick::new("Y", 50.0, 1.0, t0() + Duration::seconds(m * 60)));
        }
        let open_before = e.open_candles();
        assert!(open_before > 2);

        let forced = e.force_complete_all();
        assert_eq!(forced.len(), open_before);
        assert!(forced.iter().all(|c| c.is_complete && c.tick_count > 0));
        assert_eq!(e.open_candles(), 0);
    }

    #[test]
    fn forced_base_merges_into_open_higher_candle() {
        let mut e = engine(vec![Timeframe::M1, Timeframe::M5]);
        e.on_tick(&tick_at(0, 100.0, 1.0));
        e.on_tick(&tick_at(60, 110.0, 1.0));
        let forced = e.force_complete_all();
        assert_eq!(forced.len(), 2);
        let five = forced.iter().find(|c| c.timeframe == Timeframe::M5).unwrap();
        assert_eq!(five.high, 110.0);
        assert_eq!(five.close, 110.0);
        assert_eq!(five.tick_count, 2);
    }

    #[test]
    fn remove_symbol_flushes_its_candles() {
        let mut e = engine(vec![Timeframe::M1]);
        e.on_tick(&tick_at(0, 100.0, 1.0));
        let flushed = e.remove_symbol("X");
        assert_eq!(flushed.len(), 1);
        assert!(!e.is_tracked("X"));
        assert!(e.on_tick(&tick_at(5, 100.0, 1.0)).is_empty());
        assert!(e.remove_symbol("X").is_empty());
    }

    #[test]
    fn non_multiple_timeframes_are_skipped() {
        let cfg = CandleConfig {
            base_timeframe: Timeframe::M5,
            timeframes: vec![Timeframe::M1, Timeframe::M15, Timeframe::H1],
            ..CandleConfig::default()
        };
        let e = CandleEngine::new(&cfg);
        assert_eq!(e.timeframes(), vec![Timeframe::M5, Timeframe::M15, Timeframe::H1]);
    }

    proptest! {
        #[test]
        fn single_bucket_candle_matches_folded_ticks(
            ticks in prop::collection::vec((1.0f64..10_000.0, 0.0f64..1_000.0), 1..64)
        ) {
            let mut e = engine(vec![Timeframe::M1]);
            for (i, (price, volume)) in ticks.iter().enumerate() {
                let secs = (i % 60) as i64;
                e.on_tick(&tick_at(secs, *price, *volume));
            }
            let candle = e.force_complete_all().remove(0);

            let max = ticks.iter().map(|t| t.0).fold(f64::MIN, f64::max);
            let min = ticks.iter().map(|t| t.0).fold(f64::MAX, f64::min);
            let vol: f64 = ticks.iter().map(|t| t.1).sum();

            prop_assert_eq!(candle.high, max);
            prop_assert_eq!(candle.low, min);
            prop_assert!((candle.volume - vol).abs() < 1e-6);
            prop_assert_eq!(candle.tick_count, ticks.len() as u64);
            prop_assert!(candle.is_valid());
        }
    }
}
