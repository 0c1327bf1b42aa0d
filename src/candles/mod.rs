pub mod candle;
pub mod engine;
pub mod timeframe;

pub use candle::{Candle, CandleKey};
pub use engine::CandleEngine;
pub use timeframe::Timeframe;
