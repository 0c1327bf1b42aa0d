// =============================================================================
// Relative Strength Index
// =============================================================================
//
// Gains and losses of consecutive closes are Wilder-smoothed independently
// (same smoother as ATR), then
//
//   RSI = 100                          when avg_loss == 0 (flat market too)
//   RSI = 100 - 100 / (1 + gain/loss)  otherwise
// =============================================================================

use super::atr::wilder_smooth;

/// RSI series, one value per close from index `period` onwards.  Empty when
/// `period == 0`, when fewer than `period + 1` closes exist, or when any close
/// is non-finite.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period || closes.iter().any(|c| !c.is_finite()) {
        return Vec::new();
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = closes
        .windows(2)
        .map(|w| {
            let delta = w[1] - w[0];
            (delta.max(0.0), (-delta).max(0.0))
        })
        .unzip();

    wilder_smooth(&gains, period)
        .into_iter()
        .zip(wilder_smooth(&losses, period))
        .map(|(gain, loss)| {
            if loss == 0.0 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + gain / loss)
            }
        })
        .take_while(|rsi| rsi.is_finite())
        .collect()
}

/// Most recent RSI value, if there is enough data.
pub fn current_rsi(closes: &[f64], period: usize) -> Option<f64> {
    calculate_rsi(closes, period).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_inputs_yield_nothing() {
        assert!(calculate_rsi(&[], 14).is_empty());
        assert!(calculate_rsi(&[1.0, 2.0, 3.0], 0).is_empty());
        assert!(calculate_rsi(&[1.0, 2.0, 3.0], 3).is_empty());
        assert_eq!(calculate_rsi(&[1.0, 2.0, 3.0, 4.0], 3).len(), 1);
        assert!(calculate_rsi(&[1.0, f64::INFINITY, 3.0, 4.0], 2).is_empty());
    }

    #[test]
    fn steady_climb_pins_at_100() {
        let closes: Vec<f64> = (0..40).map(|i| 50.0 + i as f64 * 0.5).collect();
        let series = calculate_rsi(&closes, 14);
        assert_eq!(series.len(), 40 - 14);
        assert!(series.iter().all(|&v| v == 100.0));
    }

    #[test]
    fn steady_decline_pins_at_0() {
        let closes: Vec<f64> = (0..25).map(|i| 80.0 - i as f64).collect();
        assert_eq!(current_rsi(&closes, 14), Some(0.0));
    }

    #[test]
    fn unchanged_closes_read_as_100() {
        assert_eq!(current_rsi(&[42.0; 20], 14), Some(100.0));
    }

    #[test]
    fn follows_wilder_recurrence() {
        // period 2, deltas [+1, -0.5, +1, -0.5]
        //   seed:  gain 0.5,   loss 0.25    → 66.67
        //   step:  gain 0.75,  loss 0.125   → 85.71
        //   step:  gain 0.375, loss 0.3125  → 54.55
        let series = calculate_rsi(&[10.0, 11.0, 10.5, 11.5, 11.0], 2);
        let expected = [
            100.0 - 100.0 / 3.0,
            100.0 - 100.0 / 7.0,
            100.0 - 100.0 / (1.0 + 0.375 / 0.3125),
        ];
        assert_eq!(series.len(), expected.len());
        for (got, want) in series.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{got} vs {want}");
        }
    }

    #[test]
    fn mixed_series_stays_in_range() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + ((i * 7) % 11) as f64 - 5.0)
            .collect();
        for v in calculate_rsi(&closes, 14) {
            assert!((0.0..=100.0).contains(&v), "RSI {v} out of range");
        }
    }
}
