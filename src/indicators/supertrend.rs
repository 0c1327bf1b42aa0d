// =============================================================================
// Supertrend
// =============================================================================
//
// Basic bands around the bar midpoint:
//   upper = HL2 + multiplier · ATR
//   lower = HL2 - multiplier · ATR
//
// Direction flips on the previous Supertrend value only:
//   close > previous value → up,   value = lower band
//   otherwise              → down, value = upper band
// The first bar with an ATR is up when its close is at or above HL2.
//
// NOTE: this is a simplification of the textbook indicator, which also
// ratchets the final bands against their own previous values.  Outputs can
// differ from charting packages that implement the full band carry-over.
// =============================================================================

use super::atr::calculate_atr_series;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendDirection {
    Up,
    Down,
}

impl TrendDirection {
    /// +1 for up, -1 for down.
    pub fn as_f64(&self) -> f64 {
        match self {
            TrendDirection::Up => 1.0,
            TrendDirection::Down => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupertrendResult {
    pub value: f64,
    pub direction: TrendDirection,
}

/// Latest Supertrend value over aligned bar series.
///
/// Returns `None` when the ATR is not yet available, inputs are misaligned, or
/// a value is non-finite.
pub fn calculate_supertrend(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    true_ranges: &[f64],
    period: usize,
    multiplier: f64,
) -> Option<SupertrendResult> {
    let n = closes.len();
    if highs.len() != n || lows.len() != n || true_ranges.len() != n {
        return None;
    }
    let atr = calculate_atr_series(true_ranges, period);
    if atr.is_empty() {
        return None;
    }

    let mut current: Option<SupertrendResult> = None;
    for (j, atr_value) in atr.iter().enumerate() {
        let i = period - 1 + j;
        let hl2 = (highs[i] + lows[i]) / 2.0;
        let upper = hl2 + multiplier * atr_value;
        let lower = hl2 - multiplier * atr_value;
        let close = closes[i];

        let up = match current {
            Some(prev) => close > prev.value,
            None => close >= hl2,
        };

        let next = if up {
            SupertrendResult {
                value: lower,
                direction: TrendDirection::Up,
            }
        } else {
            SupertrendResult {
                value: upper,
                direction: TrendDirection::Down,
            }
        };
        if !next.value.is_finite() {
            return None;
        }
        current = Some(next);
    }

    current
}
