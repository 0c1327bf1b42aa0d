// =============================================================================
// Timeframes and bucket alignment
// =============================================================================
//
// Intraday buckets are floored to epoch-aligned multiples of the timeframe
// duration.  The daily bucket is anchored to the market's open time-of-day
// (UTC) instead of midnight, so a session that opens at 03:45 UTC gets one
// daily candle from 03:45 to 03:45 the next day.
// =============================================================================

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Candle bucket duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "1D")]
    D1,
}

impl Timeframe {
    /// Every supported timeframe, shortest first.
    pub const ALL: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::D1,
    ];

    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::M30 => 30 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.seconds())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::D1 => "1D",
        }
    }

    /// Whether candles of `base` can be merged into this timeframe without
    /// straddling bucket boundaries.
    pub fn is_multiple_of(&self, base: Timeframe) -> bool {
        self.seconds() > base.seconds() && self.seconds() % base.seconds() == 0
    }

    /// Start of the bucket that `ts` falls into.
    pub fn bucket_start(&self, ts: DateTime<Utc>, market_open: NaiveTime) -> DateTime<Utc> {
        match self {
            Timeframe::D1 => {
                let open_today = Utc.from_utc_datetime(&ts.date_naive().and_time(market_open));
                if ts >= open_today {
                    open_today
                } else {
                    open_today - Duration::days(1)
                }
            }
            _ => {
                let secs = ts.timestamp();
                let floored = secs - secs.rem_euclid(self.seconds());
                DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(ts)
            }
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::anyhow!("unknown timeframe: {s}"))
    }
}
