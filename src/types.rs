/// Core data types for the order-flow pipeline
///
/// Raw records match the JSON wire schema of the upstream market-data feed
/// (string-encoded price/size, millisecond timestamps). Everything derived
/// from them is strongly typed and keyed per [`Coin`].
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tracked instrument. Instruments never interact; all downstream state is
/// keyed per coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Coin {
    Btc,
    Eth,
    Hype,
}

impl Coin {
    pub fn all() -> [Coin; 3] {
        [Coin::Btc, Coin::Eth, Coin::Hype]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Coin::Btc => "BTC",
            Coin::Eth => "ETH",
            Coin::Hype => "HYPE",
        }
    }

    /// Parse a wire-format coin symbol (case-insensitive).
    pub fn parse(s: &str) -> Option<Coin> {
        match s.to_uppercase().as_str() {
            "BTC" => Some(Coin::Btc),
            "ETH" => Some(Coin::Eth),
            "HYPE" => Some(Coin::Hype),
            _ => None,
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggressor side of a trade, or the book side a liquidation hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, Side::Sell)
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw trade exactly as received from the feed. Price and size arrive as
/// strings; `side` is the exchange flag (`B`/`A`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTrade {
    pub coin: String,
    pub side: String,
    pub price: String,
    pub size: String,
    /// Exchange timestamp in milliseconds.
    pub time: i64,
    pub id: String,
}

/// Raw liquidation from the feed. `side` is the liquidated position
/// (`long`/`short`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawLiquidation {
    pub coin: String,
    pub side: String,
    pub price: String,
    pub size: String,
    pub time: i64,
    pub id: String,
}

/// Size tier by USD notional, thresholds per coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum SizeTier {
    Small,
    Medium,
    Large,
    Whale,
}

impl SizeTier {
    pub fn label(&self) -> &'static str {
        match self {
            SizeTier::Small => "small",
            SizeTier::Medium => "medium",
            SizeTier::Large => "large",
            SizeTier::Whale => "whale",
        }
    }
}

/// Cascade-risk hint attached to a classified liquidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
pub enum CascadeRisk {
    Low,
    Medium,
    High,
}

/// Immutable classified trade. Created once by the classifier, never mutated.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifiedTrade {
    pub coin: Coin,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    /// price * size in USD.
    pub notional: f64,
    pub tier: SizeTier,
    pub time: DateTime<Utc>,
    pub id: String,
}

impl ClassifiedTrade {
    /// Signed notional: positive for aggressive buys, negative for sells.
    pub fn signed_notional(&self) -> f64 {
        match self.side {
            Side::Buy => self.notional,
            Side::Sell => -self.notional,
        }
    }
}

/// Immutable classified liquidation. `side` is the book side the forced
/// close hits: a long liquidation sells into the bid.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClassifiedLiquidation {
    pub coin: Coin,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub notional: f64,
    pub tier: SizeTier,
    pub cascade_risk: CascadeRisk,
    pub time: DateTime<Utc>,
    pub id: String,
}

/// Which side dominates a liquidity node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum DominantSide {
    Buy,
    Sell,
    Neutral,
}

/// Per-price-bucket order-flow aggregate.
///
/// Owned exclusively by the aggregator; detectors only read. The invariant
/// `net_flow == buy_volume - sell_volume` holds after any fold sequence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiquidityNode {
    /// round(price / grid_size)
    pub bucket: i64,
    /// Bucket center price (bucket * grid_size).
    pub price: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub buy_count: u64,
    pub sell_count: u64,
    pub net_flow: f64,
    pub dominant_side: DominantSide,
    pub whale_activity: bool,
    pub liquidation_count: u64,
    pub last_update: DateTime<Utc>,
}

impl LiquidityNode {
    pub fn new(bucket: i64, grid_size: f64, time: DateTime<Utc>) -> Self {
        Self {
            bucket,
            price: bucket as f64 * grid_size,
            buy_volume: 0.0,
            sell_volume: 0.0,
            buy_count: 0,
            sell_count: 0,
            net_flow: 0.0,
            dominant_side: DominantSide::Neutral,
            whale_activity: false,
            liquidation_count: 0,
            last_update: time,
        }
    }

    pub fn fold_trade(&mut self, trade: &ClassifiedTrade) {
        match trade.side {
            Side::Buy => {
                self.buy_volume += trade.notional;
                self.buy_count += 1;
            }
            Side::Sell => {
                self.sell_volume += trade.notional;
                self.sell_count += 1;
            }
        }
        self.net_flow = self.buy_volume - self.sell_volume;
        self.dominant_side = if self.buy_volume > self.sell_volume * 1.2 {
            DominantSide::Buy
        } else if self.sell_volume > self.buy_volume * 1.2 {
            DominantSide::Sell
        } else {
            DominantSide::Neutral
        };
        if trade.tier == SizeTier::Whale {
            self.whale_activity = true;
        }
        if trade.time > self.last_update {
            self.last_update = trade.time;
        }
    }

    pub fn fold_liquidation(&mut self, liq: &ClassifiedLiquidation) {
        self.liquidation_count += 1;
        if liq.time > self.last_update {
            self.last_update = liq.time;
        }
    }

    pub fn total_volume(&self) -> f64 {
        self.buy_volume + self.sell_volume
    }

    pub fn trade_count(&self) -> u64 {
        self.buy_count + self.sell_count
    }

    /// Volume on the node's dominant side (total when neutral).
    pub fn dominant_volume(&self) -> f64 {
        match self.dominant_side {
            DominantSide::Buy => self.buy_volume,
            DominantSide::Sell => self.sell_volume,
            DominantSide::Neutral => self.total_volume(),
        }
    }
}

/// Net flow direction over a window, by a 10% ratio threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum FlowDirection {
    Inflow,
    Outflow,
    #[default]
    Neutral,
}

impl FlowDirection {
    pub fn label(&self) -> &'static str {
        match self {
            FlowDirection::Inflow => "INFLOW",
            FlowDirection::Outflow => "OUTFLOW",
            FlowDirection::Neutral => "NEUTRAL",
        }
    }
}

/// Snapshot-computed summary over one time window. Never mutated
/// incrementally; rebuilt from retained raw records on each pull.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FlowMetrics {
    pub total_volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub whale_buy_volume: f64,
    pub whale_sell_volume: f64,
    /// (buy - sell) / (buy + sell), in [-1, 1].
    pub volume_imbalance: f64,
    pub trade_imbalance: f64,
    pub whale_imbalance: f64,
    pub direction: FlowDirection,
    pub trade_count: u64,
    pub whale_count: u64,
    pub liquidation_count: u64,
    pub long_liquidation_volume: f64,
    pub short_liquidation_volume: f64,
}

/// One fixed-interval bucket of flow history, ordered by timestamp.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowTimePoint {
    pub time: DateTime<Utc>,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub net_flow: f64,
    /// Running CVD from the window start through this bucket.
    pub cvd: f64,
    pub trade_count: u64,
    pub liquidation_volume: f64,
    /// Last trade price in the bucket, carried forward when empty.
    pub price: f64,
}

/// Supported query windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TimeWindow {
    M1,
    M5,
    M15,
    H1,
    H4,
}

impl TimeWindow {
    pub fn duration(&self) -> ChronoDuration {
        match self {
            TimeWindow::M1 => ChronoDuration::minutes(1),
            TimeWindow::M5 => ChronoDuration::minutes(5),
            TimeWindow::M15 => ChronoDuration::minutes(15),
            TimeWindow::H1 => ChronoDuration::hours(1),
            TimeWindow::H4 => ChronoDuration::hours(4),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimeWindow::M1 => "1m",
            TimeWindow::M5 => "5m",
            TimeWindow::M15 => "15m",
            TimeWindow::H1 => "1h",
            TimeWindow::H4 => "4h",
        }
    }
}

/// Full pull-based aggregation result for one coin and window.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowData {
    pub coin: Coin,
    pub window: TimeWindow,
    /// Sorted ascending by bucket.
    pub nodes: Vec<LiquidityNode>,
    pub metrics: FlowMetrics,
    pub series: Vec<FlowTimePoint>,
    pub current_price: Option<f64>,
    pub generated_at: DateTime<Utc>,
}
