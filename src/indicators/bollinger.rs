// =============================================================================
// Bollinger Bands
// =============================================================================
//
//   middle = SMA(period)
//   upper  = middle + k·σ
//   lower  = middle - k·σ
//
// σ is the population standard deviation of the same window.

use super::sma::calculate_sma;
use super::IndicatorError;

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Distance between the outer bands.
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Result<BollingerBands, IndicatorError> {
    const NAME: &str = "bollinger";
    if period == 0 {
        return Err(IndicatorError::InvalidPeriod { indicator: NAME });
    }
    if closes.len() < period {
        return Err(IndicatorError::InsufficientHistory {
            indicator: NAME,
            needed: period,
            available: closes.len(),
        });
    }

    let middle = calculate_sma(closes, period).ok_or(IndicatorError::NonFinite { indicator: NAME })?;
    let window = &closes[closes.len() - period..];
    let sigma = (window.iter().map(|c| (c - middle) * (c - middle)).sum::<f64>() / period as f64).sqrt();

    let bands = BollingerBands {
        upper: middle + num_std * sigma,
        middle,
        lower: middle - num_std * sigma,
    };
    if bands.upper.is_finite() && bands.lower.is_finite() {
        Ok(bands)
    } else {
        Err(IndicatorError::NonFinite { indicator: NAME })
    }
}
