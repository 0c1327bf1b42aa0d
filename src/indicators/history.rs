// =============================================================================
// Rolling candle history — fixed-capacity ring per (symbol, timeframe)
// =============================================================================

use std::collections::VecDeque;

use crate::candles::Candle;

use super::atr::true_range;

/// Bounded series of the candle fields the indicators read.  The oldest entry
/// is evicted once `capacity` is reached.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    capacity: usize,
    closes: VecDeque<f64>,
    highs: VecDeque<f64>,
    lows: VecDeque<f64>,
    volumes: VecDeque<f64>,
    true_ranges: VecDeque<f64>,
}

impl RollingHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            closes: VecDeque::with_capacity(capacity),
            highs: VecDeque::with_capacity(capacity),
            lows: VecDeque::with_capacity(capacity),
            volumes: VecDeque::with_capacity(capacity),
            true_ranges: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, candle: &Candle) {
        let prev_close = self.closes.back().copied();
        let tr = true_range(candle.high, candle.low, prev_close);

        if self.closes.len() == self.capacity {
            self.closes.pop_front();
            self.highs.pop_front();
            self.lows.pop_front();
            self.volumes.pop_front();
            self.true_ranges.pop_front();
        }

        self.closes.push_back(candle.close);
        self.highs.push_back(candle.high);
        self.lows.push_back(candle.low);
        self.volumes.push_back(candle.volume);
        self.true_ranges.push_back(tr);
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn closes(&self) -> Vec<f64> {
        self.closes.iter().copied().collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.highs.iter().copied().collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.lows.iter().copied().collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.volumes.iter().copied().collect()
    }

    pub fn true_ranges(&self) -> Vec<f64> {
        self.true_ranges.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::Timeframe;
    use chrono::Utc;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "X".into(),
            timeframe: Timeframe::M1,
            timestamp: Utc::now(),
            open: close,
            high,
            low,
            close,
            volume: 10.0,
            oi: 0.0,
            tick_count: 1,
            is_complete: true,
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut h = RollingHistory::new(3);
        for i in 0..5 {
            let c = 100.0 + i as f64;
            h.push(&candle(c + 1.0, c - 1.0, c));
        }
        assert_eq!(h.len(), 3);
        assert_eq!(h.closes(), vec![102.0, 103.0, 104.0]);
        assert_eq!(h.true_ranges().len(), 3);
    }

    #[test]
    fn first_true_range_is_high_minus_low() {
        let mut h = RollingHistory::new(10);
        h.push(&candle(105.0, 95.0, 100.0));
        // Gap up: |120 - 100| exceeds the bar's own range.
        h.push(&candle(120.0, 115.0, 118.0));
        assert_eq!(h.true_ranges(), vec![10.0, 20.0]);
    }
}
