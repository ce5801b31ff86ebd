//! Per-coin flow aggregation over bounded rings of classified records.
//!
//! The aggregator is pull-based: `flow_data` recomputes nodes, metrics, and
//! the time series from the retained raw records on every call, so stale
//! partial state can never leak between windows. The only mutations are
//! `push_trade`/`push_liquidation` and the periodic `prune`.

use crate::config::{self, CoinProfile, EngineConfig};
use crate::types::{
    ClassifiedLiquidation, ClassifiedTrade, Coin, FlowData, FlowDirection, FlowMetrics,
    FlowTimePoint, LiquidityNode, Side, SizeTier, TimeWindow,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, VecDeque};

/// Immutable copy of the record rings handed to detectors, so they can run
/// off-lock without observing a half-updated ring.
#[derive(Debug, Clone, Default)]
pub struct FlowSnapshot {
    pub trades: Vec<ClassifiedTrade>,
    pub liquidations: Vec<ClassifiedLiquidation>,
}

impl FlowSnapshot {
    pub fn current_price(&self) -> Option<f64> {
        self.trades.last().map(|t| t.price)
    }
}

#[derive(Debug)]
pub struct FlowAggregator {
    profile: CoinProfile,
    retention: ChronoDuration,
    series_interval_ms: i64,
    trades: VecDeque<ClassifiedTrade>,
    liquidations: VecDeque<ClassifiedLiquidation>,
}

impl FlowAggregator {
    pub fn new(profile: CoinProfile, config: &EngineConfig) -> Self {
        Self {
            profile,
            retention: ChronoDuration::seconds(config.retention_secs),
            series_interval_ms: config.series_interval_ms,
            trades: VecDeque::with_capacity(1024),
            liquidations: VecDeque::with_capacity(128),
        }
    }

    pub fn coin(&self) -> Coin {
        self.profile.coin
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    /// Append a classified trade, enforcing the ring cap.
    pub fn push_trade(&mut self, trade: ClassifiedTrade) {
        if self.trades.len() >= config::max_trades() {
            self.trades.pop_front();
        }
        self.trades.push_back(trade);
    }

    /// Append a classified liquidation, enforcing the ring cap.
    pub fn push_liquidation(&mut self, liq: ClassifiedLiquidation) {
        if self.liquidations.len() >= config::max_liquidations() {
            self.liquidations.pop_front();
        }
        self.liquidations.push_back(liq);
    }

    /// Discard records older than the retention horizon. Invoked on a fixed
    /// tick; must not run concurrently with snapshot readers.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        while let Some(front) = self.trades.front() {
            if front.time < cutoff {
                self.trades.pop_front();
            } else {
                break;
            }
        }
        while let Some(front) = self.liquidations.front() {
            if front.time < cutoff {
                self.liquidations.pop_front();
            } else {
                break;
            }
        }
    }

    /// Clone the current rings for off-lock detector passes.
    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            trades: self.trades.iter().cloned().collect(),
            liquidations: self.liquidations.iter().cloned().collect(),
        }
    }

    /// Recent liquidations in ascending time order, for the classifier's
    /// cascade-risk hint.
    pub fn recent_liquidations(&self) -> Vec<ClassifiedLiquidation> {
        self.liquidations.iter().cloned().collect()
    }

    pub fn latest_price(&self) -> Option<f64> {
        self.trades.back().map(|t| t.price)
    }

    /// Full recomputation for `[now - window, now]`.
    pub fn flow_data(&self, window: TimeWindow, now: DateTime<Utc>) -> FlowData {
        let cutoff = now - window.duration();
        let trades: Vec<&ClassifiedTrade> =
            self.trades.iter().filter(|t| t.time >= cutoff).collect();
        let liqs: Vec<&ClassifiedLiquidation> = self
            .liquidations
            .iter()
            .filter(|l| l.time >= cutoff)
            .collect();

        FlowData {
            coin: self.profile.coin,
            window,
            nodes: self.build_nodes(&trades, &liqs, now),
            metrics: build_metrics(&trades, &liqs),
            series: self.build_series(&trades, &liqs, cutoff, now, self.series_interval_ms),
            current_price: self.latest_price(),
            generated_at: now,
        }
    }

    /// Time series alone, at a caller-chosen interval.
    pub fn time_series(
        &self,
        window: TimeWindow,
        interval_ms: i64,
        now: DateTime<Utc>,
    ) -> Vec<FlowTimePoint> {
        let cutoff = now - window.duration();
        let trades: Vec<&ClassifiedTrade> =
            self.trades.iter().filter(|t| t.time >= cutoff).collect();
        let liqs: Vec<&ClassifiedLiquidation> = self
            .liquidations
            .iter()
            .filter(|l| l.time >= cutoff)
            .collect();
        self.build_series(&trades, &liqs, cutoff, now, interval_ms)
    }

    fn bucket_of(&self, price: f64) -> i64 {
        (price / self.profile.grid_size).round() as i64
    }

    fn build_nodes(
        &self,
        trades: &[&ClassifiedTrade],
        liqs: &[&ClassifiedLiquidation],
        now: DateTime<Utc>,
    ) -> Vec<LiquidityNode> {
        // BTreeMap keeps the output ordered by bucket without a second sort.
        let mut nodes: BTreeMap<i64, LiquidityNode> = BTreeMap::new();

        for trade in trades {
            if trade.price <= 0.0 {
                continue;
            }
            let bucket = self.bucket_of(trade.price);
            nodes
                .entry(bucket)
                .or_insert_with(|| LiquidityNode::new(bucket, self.profile.grid_size, now))
                .fold_trade(trade);
        }

        for liq in liqs {
            if liq.price <= 0.0 {
                continue;
            }
            let bucket = self.bucket_of(liq.price);
            nodes
                .entry(bucket)
                .or_insert_with(|| LiquidityNode::new(bucket, self.profile.grid_size, now))
                .fold_liquidation(liq);
        }

        nodes.into_values().collect()
    }

    fn build_series(
        &self,
        trades: &[&ClassifiedTrade],
        liqs: &[&ClassifiedLiquidation],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval_ms: i64,
    ) -> Vec<FlowTimePoint> {
        let interval_ms = interval_ms.max(1_000);
        let span_ms = (end - start).num_milliseconds().max(0);
        let bucket_count = (span_ms / interval_ms + 1) as usize;

        let mut points: Vec<FlowTimePoint> = (0..bucket_count)
            .map(|i| FlowTimePoint {
                time: start + ChronoDuration::milliseconds(i as i64 * interval_ms),
                buy_volume: 0.0,
                sell_volume: 0.0,
                net_flow: 0.0,
                cvd: 0.0,
                trade_count: 0,
                liquidation_volume: 0.0,
                price: 0.0,
            })
            .collect();

        let index_of = |time: DateTime<Utc>| -> Option<usize> {
            let offset = (time - start).num_milliseconds();
            if offset < 0 {
                return None;
            }
            let idx = (offset / interval_ms) as usize;
            (idx < bucket_count).then_some(idx)
        };

        for trade in trades {
            if let Some(idx) = index_of(trade.time) {
                let point = &mut points[idx];
                match trade.side {
                    Side::Buy => point.buy_volume += trade.notional,
                    Side::Sell => point.sell_volume += trade.notional,
                }
                point.trade_count += 1;
                point.price = trade.price;
            }
        }

        for liq in liqs {
            if let Some(idx) = index_of(liq.time) {
                points[idx].liquidation_volume += liq.notional;
            }
        }

        // Running CVD plus price carry-forward for empty buckets.
        let mut cvd = 0.0;
        let mut last_price = 0.0;
        for point in &mut points {
            point.net_flow = point.buy_volume - point.sell_volume;
            cvd += point.net_flow;
            point.cvd = cvd;
            if point.price > 0.0 {
                last_price = point.price;
            } else {
                point.price = last_price;
            }
        }

        points
    }
}

fn imbalance(buy: f64, sell: f64) -> f64 {
    let total = buy + sell;
    if total > 0.0 {
        ((buy - sell) / total).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

fn build_metrics(trades: &[&ClassifiedTrade], liqs: &[&ClassifiedLiquidation]) -> FlowMetrics {
    let mut metrics = FlowMetrics::default();
    let mut buy_count = 0u64;
    let mut sell_count = 0u64;
    let mut whale_buys = 0u64;
    let mut whale_sells = 0u64;

    for trade in trades {
        match trade.side {
            Side::Buy => {
                metrics.buy_volume += trade.notional;
                buy_count += 1;
            }
            Side::Sell => {
                metrics.sell_volume += trade.notional;
                sell_count += 1;
            }
        }
        if trade.tier == SizeTier::Whale {
            match trade.side {
                Side::Buy => {
                    metrics.whale_buy_volume += trade.notional;
                    whale_buys += 1;
                }
                Side::Sell => {
                    metrics.whale_sell_volume += trade.notional;
                    whale_sells += 1;
                }
            }
        }
    }

    for liq in liqs {
        metrics.liquidation_count += 1;
        match liq.side {
            // Long liquidations hit the bid (forced sells).
            Side::Sell => metrics.long_liquidation_volume += liq.notional,
            Side::Buy => metrics.short_liquidation_volume += liq.notional,
        }
    }

    metrics.total_volume = metrics.buy_volume + metrics.sell_volume;
    metrics.trade_count = buy_count + sell_count;
    metrics.whale_count = whale_buys + whale_sells;
    metrics.volume_imbalance = imbalance(metrics.buy_volume, metrics.sell_volume);
    metrics.trade_imbalance = imbalance(buy_count as f64, sell_count as f64);
    metrics.whale_imbalance = imbalance(metrics.whale_buy_volume, metrics.whale_sell_volume);

    // Direction by a 10% ratio threshold on buy vs sell volume.
    metrics.direction = if metrics.total_volume > 0.0 {
        if metrics.buy_volume > metrics.sell_volume * 1.1 {
            FlowDirection::Inflow
        } else if metrics.sell_volume > metrics.buy_volume * 1.1 {
            FlowDirection::Outflow
        } else {
            FlowDirection::Neutral
        }
    } else {
        FlowDirection::Neutral
    };

    metrics
}
