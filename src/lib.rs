// =============================================================================
// Aurora Data Plane
// =============================================================================
//
// Real-time market data plane: vendor ingestion, multi-timeframe candle
// aggregation, rolling indicators and a shared error-recovery chokepoint.
// `main.rs` is the composition root; everything here is wired explicitly.
// =============================================================================

pub mod candles;
pub mod error_recovery;
pub mod events;
pub mod indicators;
pub mod market_data;
pub mod pipeline;
pub mod runtime_config;
pub mod types;
