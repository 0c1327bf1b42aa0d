// =============================================================================
// Outbound events — ticks, completed candles and indicator snapshots
// =============================================================================
//
// Persistence, strategies and UI all consume the same broadcast stream.  A
// slow consumer lags and loses the oldest events; it never stalls the
// processing loop.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::candles::{Candle, Timeframe};
use crate::indicators::IndicatorSnapshot;
use crate::types::Tick;

const DEFAULT_CHANNEL_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    Tick {
        symbol: String,
        ltp: f64,
        bid: f64,
        ask: f64,
        volume: f64,
        oi: f64,
        timestamp: DateTime<Utc>,
    },
    CandleCompleted {
        symbol: String,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        is_complete: bool,
    },
    IndicatorUpdated {
        symbol: String,
        timeframe: Timeframe,
        timestamp: DateTime<Utc>,
        indicators: BTreeMap<String, f64>,
    },
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Tick { symbol, .. }
            | MarketEvent::CandleCompleted { symbol, .. }
            | MarketEvent::IndicatorUpdated { symbol, .. } => symbol,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MarketEvent::Tick { .. } => "tick",
            MarketEvent::CandleCompleted { .. } => "candle_completed",
            MarketEvent::IndicatorUpdated { .. } => "indicator_updated",
        }
    }
}

impl From<&Tick> for MarketEvent {
    fn from(tick: &Tick) -> Self {
        MarketEvent::Tick {
            symbol: tick.symbol.clone(),
            ltp: tick.ltp,
            bid: tick.bid,
            ask: tick.ask,
            volume: tick.volume,
            oi: tick.oi,
            timestamp: tick.timestamp,
        }
    }
}

impl From<&Candle> for MarketEvent {
    fn from(candle: &Candle) -> Self {
        MarketEvent::CandleCompleted {
            symbol: candle.symbol.clone(),
            timeframe: candle.timeframe,
            timestamp: candle.timestamp,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
            is_complete: candle.is_complete,
        }
    }
}

impl From<IndicatorSnapshot> for MarketEvent {
    fn from(snapshot: IndicatorSnapshot) -> Self {
        MarketEvent::IndicatorUpdated {
            symbol: snapshot.symbol,
            timeframe: snapshot.timeframe,
            timestamp: snapshot.timestamp,
            indicators: snapshot.indicators,
        }
    }
}

/// Cloneable handle onto the outbound broadcast channel.
#[derive(Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<MarketEvent>,
    published: Arc<AtomicU64>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.tx.subscribe()
    }

    /// Publish to every subscriber and return how many received it.
    /// Returns 0 when nobody is listening.
    pub fn publish(&self, event: MarketEvent) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);
        trace!(kind = event.kind(), symbol = %event.symbol(), "event published");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tick_event_serialises_with_tag() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 4, 0, 0).unwrap();
        let event = MarketEvent::from(&Tick::new("NIFTY", 100.0, 5.0, ts));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tick");
        assert_eq!(json["symbol"], "NIFTY");
        assert_eq!(json["ltp"], 100.0);
    }

    #[test]
    fn candle_event_carries_timeframe_label() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 4, 0, 0).unwrap();
        let tick = Tick::new("X", 10.0, 1.0, ts);
        let candle = Candle::from_tick(&tick, Timeframe::M5, ts).complete();
        let json = serde_json::to_value(MarketEvent::from(&candle)).unwrap();
        assert_eq!(json["type"], "candle_completed");
        assert_eq!(json["timeframe"], "5m");
        assert_eq!(json["is_complete"], true);
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let publisher = EventPublisher::new(8);
        assert_eq!(
            publisher.publish(MarketEvent::from(&Tick::new("X", 1.0, 0.0, Utc::now()))),
            0
        );

        let mut rx = publisher.subscribe();
        let delivered = publisher.publish(MarketEvent::from(&Tick::new("Y", 2.0, 0.0, Utc::now())));
        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap().symbol(), "Y");
        assert_eq!(publisher.published(), 2);
    }
}
