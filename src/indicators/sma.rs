// =============================================================================
// Simple and volume-weighted moving averages
// =============================================================================
//
//   SMA  = Σ close / period
//   VWMA = Σ(close · volume) / Σ volume      (falls back to SMA when the
//                                            window traded no volume)
// =============================================================================

/// SMA of the most recent `period` values.
pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let sma = window.iter().sum::<f64>() / period as f64;
    sma.is_finite().then_some(sma)
}

/// VWMA of the most recent `period` bars.  `closes` and `volumes` must be
/// aligned bar for bar.
pub fn calculate_vwma(closes: &[f64], volumes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period || volumes.len() != closes.len() {
        return None;
    }
    let start = closes.len() - period;
    let window_closes = &closes[start..];
    let window_volumes = &volumes[start..];

    let volume_sum: f64 = window_volumes.iter().sum();
    if volume_sum == 0.0 {
        return calculate_sma(closes, period);
    }

    let weighted: f64 = window_closes
        .iter()
        .zip(window_volumes)
        .map(|(c, v)| c * v)
        .sum();
    let vwma = weighted / volume_sum;
    vwma.is_finite().then_some(vwma)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_uses_latest_window() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(calculate_sma(&values, 2), Some(4.5));
        assert_eq!(calculate_sma(&values, 5), Some(3.0));
        assert_eq!(calculate_sma(&values, 6), None);
        assert_eq!(calculate_sma(&values, 0), None);
    }

    #[test]
    fn vwma_weights_by_volume() {
        let closes = [10.0, 20.0, 30.0];
        let volumes = [1.0, 1.0, 2.0];
        // (20*1 + 30*2) / 3
        assert!((calculate_vwma(&closes, &volumes, 2).unwrap() - 80.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn vwma_zero_volume_falls_back_to_sma() {
        let closes = [10.0, 20.0, 30.0];
        let volumes = [5.0, 0.0, 0.0];
        assert_eq!(calculate_vwma(&closes, &volumes, 2), Some(25.0));
    }

    #[test]
    fn vwma_rejects_misaligned_input() {
        assert_eq!(calculate_vwma(&[1.0, 2.0], &[1.0], 1), None);
    }
}
