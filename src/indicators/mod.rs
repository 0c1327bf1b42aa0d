// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free indicator math over slices, plus the engine that
// keeps one bounded rolling history per (symbol, timeframe) and recomputes the
// full indicator set on every completed candle.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod engine;
pub mod history;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod supertrend;

pub use engine::{IndicatorEngine, IndicatorSnapshot};
pub use history::RollingHistory;

/// Why an indicator produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndicatorError {
    #[error("{indicator}: insufficient history (need {needed}, have {available})")]
    InsufficientHistory {
        indicator: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("{indicator}: invalid period")]
    InvalidPeriod { indicator: &'static str },

    #[error("{indicator}: non-finite result")]
    NonFinite { indicator: &'static str },
}
