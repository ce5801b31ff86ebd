//! Order-flow analytics for perp markets.
//!
//! Raw trade and liquidation prints are classified by size tier, aggregated
//! into per-coin liquidity nodes and flow metrics, and scanned by a set of
//! structure detectors (absorption, liquidation cascades, support and
//! resistance, volume profile, mean reversion). A strictly gated signal
//! engine turns aligned detector evidence into at most a handful of
//! high-confidence entries per hour, and an alert manager fans the
//! interesting events out to listeners. Recorded snapshots can be replayed
//! through a VCR-style playback cursor.
//!
//! [`engine::MarketEngine`] is the entry point; everything else is exposed
//! for direct use in tests and offline tooling.

pub mod aggregator;
pub mod alerts;
pub mod classify;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod logging;
pub mod persist;
pub mod playback;
pub mod signal;
pub mod types;

pub use engine::{CoinPipeline, MarketEngine};
pub use types::{Coin, Side, SizeTier, TimeWindow};
