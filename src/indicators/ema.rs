// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = (close_t - EMA_{t-1}) * multiplier + EMA_{t-1}
//
// The very first EMA value is seeded with the SMA of the first `period`
// closes.  With fewer than `period` closes there is no seed, and that is
// reported as an error instead of seeding from whatever is available.
// =============================================================================

use super::IndicatorError;

/// Compute the EMA series for the given `closes` slice and look-back `period`.
///
/// Each output element corresponds to a close starting at index `period - 1`.
///
/// # Errors
/// - `period == 0` => [`IndicatorError::InvalidPeriod`]
/// - `closes.len() < period` => [`IndicatorError::InsufficientHistory`]
///
/// A non-finite intermediate value truncates the series; downstream consumers
/// should not trust a broken series.
pub fn calculate_ema(closes: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod { indicator: "ema" });
    }
    if closes.len() < period {
        return Err(IndicatorError::InsufficientHistory {
            indicator: "ema",
            needed: period,
            available: closes.len(),
        });
    }

    let multiplier = 2.0 / (period + 1) as f64;

    let seed: f64 = closes[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return Ok(Vec::new());
    }

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    result.push(seed);

    let mut prev = seed;
    for &close in &closes[period..] {
        let ema = (close - prev) * multiplier + prev;
        if !ema.is_finite() {
            break;
        }
        result.push(ema);
        prev = ema;
    }

    Ok(result)
}

/// Most recent EMA value.
pub fn latest_ema(closes: &[f64], period: usize) -> Result<f64, IndicatorError> {
    calculate_ema(closes, period)?
        .last()
        .copied()
        .ok_or(IndicatorError::NonFinite { indicator: "ema" })
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_period_zero() {
        assert_eq!(
            calculate_ema(&[1.0, 2.0, 3.0], 0),
            Err(IndicatorError::InvalidPeriod { indicator: "ema" })
        );
    }

    #[test]
    fn ema_insufficient_history_is_an_error() {
        assert_eq!(
            calculate_ema(&[1.0, 2.0], 5),
            Err(IndicatorError::InsufficientHistory {
                indicator: "ema",
                needed: 5,
                available: 2
            })
        );
        assert!(calculate_ema(&[], 3).is_err());
    }

    #[test]
    fn ema_period_equals_length() {
        let ema = calculate_ema(&[2.0, 4.0, 6.0], 3).unwrap();
        assert_eq!(ema.len(), 1);
        assert!((ema[0] - 4.0).abs() < 1e-10);
    }

    #[test]
    fn ema_known_values() {
        // SMA of first 5 = 3.0, multiplier = 2/6 = 1/3
        let closes: Vec<f64> = (1..=10).map(|x| x as f64).collect();
        let ema = calculate_ema(&closes, 5).unwrap();
        assert_eq!(ema.len(), 6);

        let mult = 2.0 / 6.0;
        let mut expected = 3.0;
        let mut expected_vec = vec![expected];
        for &c in &closes[5..] {
            expected = (c - expected) * mult + expected;
            expected_vec.push(expected);
        }
        for (a, b) in ema.iter().zip(expected_vec.iter()) {
            assert!((a - b).abs() < 1e-10, "got {a}, expected {b}");
        }
    }

    #[test]
    fn ema_recomputation_is_bit_identical() {
        let closes: Vec<f64> = (0..300).map(|i| 100.0 + (i as f64 * 0.37).sin() * 7.3).collect();
        let a = calculate_ema(&closes, 21).unwrap();
        let b = calculate_ema(&closes.clone(), 21).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn ema_handles_nan_in_input() {
        let ema = calculate_ema(&[1.0, 2.0, 3.0, f64::NAN, 5.0], 3).unwrap();
        assert_eq!(ema.len(), 1);
    }

    #[test]
    fn latest_ema_returns_last_value() {
        let closes = vec![10.0; 12];
        assert_eq!(latest_ema(&closes, 4).unwrap(), 10.0);
    }
}
