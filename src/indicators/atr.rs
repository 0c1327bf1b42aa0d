// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
// The first bar of a history has no previous close, so TR = H - L.
//
// ATR is the smoothed average of TR using Wilder's method:
//   ATR_0   = SMA of first `period` TR values
//   ATR_t   = (ATR_{t-1} * (period - 1) + TR_t) / period
// =============================================================================

/// True range of one bar.
pub fn true_range(high: f64, low: f64, prev_close: Option<f64>) -> f64 {
    let hl = high - low;
    match prev_close {
        Some(pc) => hl.max((high - pc).abs()).max((low - pc).abs()),
        None => hl,
    }
}

/// Wilder smoothing: seeded with the mean of the first `period` values, then
/// `avg = (avg * (period - 1) + x) / period`.  Element `j` belongs to input
/// `period - 1 + j`.  Empty on a zero period, short input or any non-finite
/// intermediate.
pub fn wilder_smooth(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let period_f = period as f64;
    let mut avg = values[..period].iter().sum::<f64>() / period_f;
    if !avg.is_finite() {
        return Vec::new();
    }

    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(avg);
    for &x in &values[period..] {
        avg = (avg * (period_f - 1.0) + x) / period_f;
        if !avg.is_finite() {
            return Vec::new();
        }
        series.push(avg);
    }
    series
}

/// ATR series over precomputed true ranges.
pub fn calculate_atr_series(true_ranges: &[f64], period: usize) -> Vec<f64> {
    wilder_smooth(true_ranges, period)
}

/// Most recent ATR value.
pub fn calculate_atr(true_ranges: &[f64], period: usize) -> Option<f64> {
    calculate_atr_series(true_ranges, period).last().copied()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn true_range_uses_prev_close() {
        assert_eq!(true_range(105.0, 95.0, None), 10.0);
        assert_eq!(true_range(115.0, 108.0, Some(95.0)), 20.0);
        assert_eq!(true_range(100.0, 90.0, Some(110.0)), 20.0);
        assert_eq!(true_range(102.0, 98.0, Some(100.0)), 4.0);
    }

    #[test]
    fn atr_period_zero() {
        assert!(calculate_atr(&[1.0; 20], 0).is_none());
    }

    #[test]
    fn atr_insufficient_data() {
        assert!(calculate_atr(&[1.0; 10], 14).is_none());
    }

    #[test]
    fn atr_seed_is_simple_average() {
        let series = calculate_atr_series(&[2.0, 4.0, 6.0], 3);
        assert_eq!(series, vec![4.0]);
    }

    #[test]
    fn atr_wilder_recurrence() {
        let series = calculate_atr_series(&[2.0, 4.0, 6.0, 10.0], 3);
        assert_eq!(series.len(), 2);
        assert!((series[1] - (4.0 * 2.0 + 10.0) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn atr_constant_range_converges() {
        let atr = calculate_atr(&[10.0; 40], 14).unwrap();
        assert!((atr - 10.0).abs() < 1e-12);
    }

    #[test]
    fn atr_nan_returns_none() {
        assert!(calculate_atr(&[1.0, f64::NAN, 1.0, 1.0], 3).is_none());
    }
}
