//! Market data ingestion (Layer 0)
//!
//! Normalizes pushed price/volume ticks into a bounded, strictly ordered
//! time series with gap detection. One feed per tracked instrument.

pub mod feed;
pub mod series;

pub use feed::{FeedConfig, FeedStats, MarketDataFeed};
pub use series::TimeSeries;
