use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Timeframe;
use crate::types::Tick;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One OHLCV bucket for a (symbol, timeframe) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Bucket start.
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Latest open interest seen in the bucket.
    pub oi: f64,
    pub tick_count: u64,
    pub is_complete: bool,
}

/// Composite key that identifies a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

impl Candle {
    /// Open a new candle seeded by the first tick of its bucket.
    pub fn from_tick(tick: &Tick, timeframe: Timeframe, bucket: DateTime<Utc>) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            timeframe,
            timestamp: bucket,
            open: tick.ltp,
            high: tick.ltp,
            low: tick.ltp,
            close: tick.ltp,
            volume: tick.volume,
            oi: tick.oi,
            tick_count: 1,
            is_complete: false,
        }
    }

    /// Open a higher-timeframe candle seeded by a completed child candle.
    pub fn from_child(child: &Candle, timeframe: Timeframe, bucket: DateTime<Utc>) -> Self {
        Self {
            symbol: child.symbol.clone(),
            timeframe,
            timestamp: bucket,
            open: child.open,
            high: child.high,
            low: child.low,
            close: child.close,
            volume: child.volume,
            oi: child.oi,
            tick_count: child.tick_count,
            is_complete: false,
        }
    }

    /// Fold a tick into this candle.  Open is never touched after seeding.
    pub fn apply_tick(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.ltp);
        self.low = self.low.min(tick.ltp);
        self.close = tick.ltp;
        self.volume += tick.volume;
        self.oi = tick.oi;
        self.tick_count += 1;
    }

    /// Merge a completed child candle into this (higher-timeframe) candle.
    pub fn merge(&mut self, child: &Candle) {
        self.high = self.high.max(child.high);
        self.low = self.low.min(child.low);
        self.close = child.close;
        self.volume += child.volume;
        self.oi = child.oi;
        self.tick_count += child.tick_count;
    }

    /// Mark the candle complete; it is immutable from here on.
    pub fn complete(mut self) -> Self {
        self.is_complete = true;
        self
    }

    pub fn key(&self) -> CandleKey {
        CandleKey::new(self.symbol.clone(), self.timeframe)
    }

    /// Midpoint of the bar, used by the band indicators.
    pub fn hl2(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    /// OHLC sanity: high bounds everything from above, low from below.
    pub fn is_valid(&self) -> bool {
        self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.volume >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 4, 0, 0).unwrap()
    }

    fn tick(price: f64, volume: f64, oi: f64) -> Tick {
        let mut t = Tick::new("SBIN", price, volume, t0());
        t.oi = oi;
        t
    }

    #[test]
    fn fold_ticks_tracks_ohlcv() {
        let mut c = Candle::from_tick(&tick(100.0, 5.0, 10.0), Timeframe::M1, t0());
        c.apply_tick(&tick(103.0, 2.0, 11.0));
        c.apply_tick(&tick(98.5, 1.0, 12.0));
        c.apply_tick(&tick(101.0, 4.0, 13.0));

        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 103.0);
        assert_eq!(c.low, 98.5);
        assert_eq!(c.close, 101.0);
        assert_eq!(c.volume, 12.0);
        assert_eq!(c.oi, 13.0);
        assert_eq!(c.tick_count, 4);
        assert!(!c.is_complete);
        assert!(c.is_valid());
    }

    #[test]
    fn merge_children_into_parent() {
        let mut a = Candle::from_tick(&tick(100.0, 5.0, 1.0), Timeframe::M1, t0());
        a.apply_tick(&tick(104.0, 5.0, 2.0));
        let mut b = Candle::from_tick(&tick(102.0, 3.0, 3.0), Timeframe::M1, t0());
        b.apply_tick(&tick(97.0, 1.0, 4.0));

        let mut parent = Candle::from_child(&a.clone().complete(), Timeframe::M5, t0());
        parent.merge(&b.complete());

        assert_eq!(parent.open, 100.0);
        assert_eq!(parent.high, 104.0);
        assert_eq!(parent.low, 97.0);
        assert_eq!(parent.close, 97.0);
        assert_eq!(parent.volume, 14.0);
        assert_eq!(parent.oi, 4.0);
        assert_eq!(parent.tick_count, 4);
        assert!(!parent.is_complete);
    }

    #[test]
    fn key_display() {
        let c = Candle::from_tick(&tick(1.0, 0.0, 0.0), Timeframe::M15, t0());
        assert_eq!(c.key().to_string(), "SBIN@15m");
    }
}
