// =============================================================================
// Runtime Configuration — data-plane settings with atomic save
// =============================================================================
//
// Every tunable of the adapter, candle engine, indicator engine and error
// handler lives here.  All fields carry `#[serde(default)]` so that adding new
// fields never breaks loading an older config file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::candles::Timeframe;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "NIFTY".to_string(),
        "BANKNIFTY".to_string(),
        "RELIANCE".to_string(),
    ]
}

fn default_vendor_url() -> String {
    "ws://127.0.0.1:9001/ticks".to_string()
}

fn default_subscription_capacity() -> usize {
    200
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_base_delay_secs() -> f64 {
    1.0
}

fn default_reconnect_max_delay_secs() -> f64 {
    60.0
}

fn default_connect_timeout_secs() -> f64 {
    10.0
}

fn default_bridge_capacity() -> usize {
    10_000
}

fn default_base_timeframe() -> Timeframe {
    Timeframe::M1
}

fn default_timeframes() -> Vec<Timeframe> {
    Timeframe::ALL.to_vec()
}

fn default_market_open_utc() -> NaiveTime {
    // 09:15 IST.
    NaiveTime::from_hms_opt(3, 45, 0).unwrap_or_default()
}

fn default_history_capacity() -> usize {
    500
}

fn default_sma_periods() -> Vec<usize> {
    vec![5, 10, 20, 50]
}

fn default_ema_periods() -> Vec<usize> {
    vec![9, 21, 50]
}

fn default_fourteen() -> usize {
    14
}

fn default_supertrend_period() -> usize {
    10
}

fn default_supertrend_multiplier() -> f64 {
    3.0
}

fn default_macd_fast() -> usize {
    12
}

fn default_macd_slow() -> usize {
    26
}

fn default_macd_signal() -> usize {
    9
}

fn default_twenty() -> usize {
    20
}

fn default_bollinger_std() -> f64 {
    2.0
}

fn default_error_history() -> usize {
    1000
}

fn default_rate_window_secs() -> u64 {
    60
}

fn default_rate_threshold() -> usize {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_multiplier() -> f64 {
    2.0
}

// =============================================================================
// Sections
// =============================================================================

/// Vendor connection and subscription limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    #[serde(default = "default_vendor_url")]
    pub vendor_url: String,

    /// Hard per-connection subscription limit.
    #[serde(default = "default_subscription_capacity")]
    pub subscription_capacity: usize,

    /// Reconnect attempts before the adapter parks in `Error`.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_reconnect_base_delay_secs")]
    pub reconnect_base_delay_secs: f64,

    #[serde(default = "default_reconnect_max_delay_secs")]
    pub reconnect_max_delay_secs: f64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: f64,

    /// Capacity of the vendor-thread → event-loop bridge.
    #[serde(default = "default_bridge_capacity")]
    pub bridge_capacity: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            vendor_url: default_vendor_url(),
            subscription_capacity: default_subscription_capacity(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_secs: default_reconnect_base_delay_secs(),
            reconnect_max_delay_secs: default_reconnect_max_delay_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            bridge_capacity: default_bridge_capacity(),
        }
    }
}

impl AdapterConfig {
    pub fn connect_timeout(&self) -> Duration {
        secs_to_duration(self.connect_timeout_secs, Duration::MAX)
    }
}

/// Candle aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleConfig {
    /// Timeframe built directly from ticks; every other timeframe is merged
    /// from completed base candles.
    #[serde(default = "default_base_timeframe")]
    pub base_timeframe: Timeframe,

    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<Timeframe>,

    /// Session open time-of-day in UTC, used to anchor daily candles.
    #[serde(default = "default_market_open_utc")]
    pub market_open_utc: NaiveTime,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            base_timeframe: default_base_timeframe(),
            timeframes: default_timeframes(),
            market_open_utc: default_market_open_utc(),
        }
    }
}

/// Indicator periods and rolling-history size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_sma_periods")]
    pub sma_periods: Vec<usize>,

    #[serde(default = "default_ema_periods")]
    pub ema_periods: Vec<usize>,

    #[serde(default = "default_twenty")]
    pub vwma_period: usize,

    #[serde(default = "default_fourteen")]
    pub rsi_period: usize,

    #[serde(default = "default_fourteen")]
    pub atr_period: usize,

    #[serde(default = "default_supertrend_period")]
    pub supertrend_period: usize,

    #[serde(default = "default_supertrend_multiplier")]
    pub supertrend_multiplier: f64,

    #[serde(default = "default_macd_fast")]
    pub macd_fast: usize,

    #[serde(default = "default_macd_slow")]
    pub macd_slow: usize,

    #[serde(default = "default_macd_signal")]
    pub macd_signal: usize,

    #[serde(default = "default_twenty")]
    pub bollinger_period: usize,

    #[serde(default = "default_bollinger_std")]
    pub bollinger_std: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            sma_periods: default_sma_periods(),
            ema_periods: default_ema_periods(),
            vwma_period: default_twenty(),
            rsi_period: default_fourteen(),
            atr_period: default_fourteen(),
            supertrend_period: default_supertrend_period(),
            supertrend_multiplier: default_supertrend_multiplier(),
            macd_fast: default_macd_fast(),
            macd_slow: default_macd_slow(),
            macd_signal: default_macd_signal(),
            bollinger_period: default_twenty(),
            bollinger_std: default_bollinger_std(),
        }
    }
}

/// Backoff shape shared by the retry and reconnect recovery strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_reconnect_base_delay_secs")]
    pub base_delay_secs: f64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_reconnect_max_delay_secs")]
    pub max_delay_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_secs: default_reconnect_base_delay_secs(),
            multiplier: default_multiplier(),
            max_delay_secs: default_reconnect_max_delay_secs(),
        }
    }
}

impl RetryPolicy {
    /// `base * multiplier^attempt`, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let cap = secs_to_duration(self.max_delay_secs, Duration::MAX);
        secs_to_duration(self.base_delay_secs * self.multiplier.powi(exp), cap)
    }
}

/// Seconds read from config as a `Duration`, capped at `ceiling`.  NaN and
/// non-positive values give zero; infinite or unrepresentable values give
/// `ceiling`.
pub fn secs_to_duration(secs: f64, ceiling: Duration) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).map_or(ceiling, |d| d.min(ceiling))
}

/// Error handler bookkeeping limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecoveryConfig {
    /// Error records retained before the oldest are evicted.
    #[serde(default = "default_error_history")]
    pub history_capacity: usize,

    #[serde(default = "default_rate_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Errors per category inside the window that flag it rate-limited.
    #[serde(default = "default_rate_threshold")]
    pub rate_limit_threshold: usize,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ErrorRecoveryConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_error_history(),
            rate_limit_window_secs: default_rate_window_secs(),
            rate_limit_threshold: default_rate_threshold(),
            retry: RetryPolicy::default(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the data plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Symbols subscribed and tracked at startup.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default)]
    pub adapter: AdapterConfig,

    #[serde(default)]
    pub candles: CandleConfig,

    #[serde(default)]
    pub indicators: IndicatorConfig,

    #[serde(default)]
    pub errors: ErrorRecoveryConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            adapter: AdapterConfig::default(),
            candles: CandleConfig::default(),
            indicators: IndicatorConfig::default(),
            errors: ErrorRecoveryConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            base_timeframe = %config.candles.base_timeframe,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}
