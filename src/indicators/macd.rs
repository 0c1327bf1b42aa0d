// =============================================================================
// MACD — Moving Average Convergence Divergence
// =============================================================================
//
//   MACD      = EMA(fast) - EMA(slow)
//   signal    = EMA(signal_period) of the MACD line
//   histogram = MACD - signal
// =============================================================================

use super::ema::calculate_ema;
use super::IndicatorError;

#[derive(Debug, Clone, PartialEq)]
pub struct MacdResult {
    pub macd: f64,
    /// Absent until the MACD line itself has `signal_period` points.
    pub signal: Option<f64>,
    pub histogram: Option<f64>,
}

/// MACD line aligned to the slow EMA: element `k` belongs to close
/// `slow - 1 + k`.
pub fn macd_line(closes: &[f64], fast: usize, slow: usize) -> Result<Vec<f64>, IndicatorError> {
    if fast == 0 || slow <= fast {
        return Err(IndicatorError::InvalidPeriod { indicator: "macd" });
    }
    let ema_fast = calculate_ema(closes, fast)?;
    let ema_slow = calculate_ema(closes, slow)?;
    let offset = slow - fast;

    Ok(ema_slow
        .iter()
        .enumerate()
        .filter_map(|(k, s)| ema_fast.get(k + offset).map(|f| f - s))
        .collect())
}

pub fn calculate_macd(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Result<MacdResult, IndicatorError> {
    let line = macd_line(closes, fast, slow)?;
    let macd = *line
        .last()
        .ok_or(IndicatorError::NonFinite { indicator: "macd" })?;

    let signal = calculate_ema(&line, signal_period)
        .ok()
        .and_then(|series| series.last().copied());
    let histogram = signal.map(|s| macd - s);

    Ok(MacdResult {
        macd,
        signal,
        histogram,
    })
}
