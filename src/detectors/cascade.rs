//! Liquidation-cascade calculation.
//!
//! Clusters recent liquidations by price proximity with a greedy single
//! pass, then projects where a cluster would drag price if it extends.

use crate::config::CascadeConfig;
use crate::types::{CascadeRisk, ClassifiedLiquidation, Coin, Side, SizeTier};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiquidationCascade {
    pub coin: Coin,
    /// Volume-weighted cluster price.
    pub cluster_price: f64,
    /// Book side the cascade presses on: `Sell` for long liquidations.
    pub side: Side,
    pub liquidation_count: usize,
    pub total_volume: f64,
    pub whale_present: bool,
    pub risk: CascadeRisk,
    /// ±1% from the cluster price in the direction that would extend it.
    pub trigger_price: f64,
    /// Further 1% steps beyond the trigger.
    pub affected_levels: Vec<f64>,
    pub detected_at: DateTime<Utc>,
}

struct Cluster {
    anchor_price: f64,
    weighted_price: f64,
    total_volume: f64,
    long_volume: f64,
    short_volume: f64,
    count: usize,
    whale: bool,
}

/// Cluster the trailing-window liquidations and score cascade risk.
pub fn detect_cascades(
    liquidations: &[ClassifiedLiquidation],
    coin: Coin,
    cfg: &CascadeConfig,
    now: DateTime<Utc>,
) -> Vec<LiquidationCascade> {
    let cutoff = now - ChronoDuration::seconds(cfg.window_secs);
    let mut clusters: Vec<Cluster> = Vec::new();

    // Greedy single pass: join the first cluster within range, else start one.
    for liq in liquidations.iter().filter(|l| l.time >= cutoff && l.price > 0.0) {
        let slot = clusters
            .iter_mut()
            .find(|c| (liq.price - c.anchor_price).abs() <= liq.price * cfg.cluster_range);
        match slot {
            Some(cluster) => {
                cluster.weighted_price += liq.price * liq.notional;
                cluster.total_volume += liq.notional;
                cluster.count += 1;
                cluster.whale |= liq.tier == SizeTier::Whale;
                match liq.side {
                    Side::Sell => cluster.long_volume += liq.notional,
                    Side::Buy => cluster.short_volume += liq.notional,
                }
            }
            None => clusters.push(Cluster {
                anchor_price: liq.price,
                weighted_price: liq.price * liq.notional,
                total_volume: liq.notional,
                long_volume: if liq.side == Side::Sell { liq.notional } else { 0.0 },
                short_volume: if liq.side == Side::Buy { liq.notional } else { 0.0 },
                count: 1,
                whale: liq.tier == SizeTier::Whale,
            }),
        }
    }

    let mut cascades: Vec<LiquidationCascade> = clusters
        .into_iter()
        .filter(|c| c.count >= cfg.min_liquidations && c.total_volume >= cfg.min_volume)
        .map(|c| {
            let price = if c.total_volume > 0.0 {
                c.weighted_price / c.total_volume
            } else {
                c.anchor_price
            };

            let risk = if c.count >= cfg.min_liquidations * 2
                || c.total_volume >= cfg.min_volume * 5.0
                || (c.whale && c.count >= cfg.min_liquidations)
            {
                CascadeRisk::High
            } else if c.total_volume >= cfg.min_volume * 2.0 || c.whale {
                CascadeRisk::Medium
            } else {
                CascadeRisk::Low
            };

            // Longs dominate -> forced selling -> the cascade extends downward.
            let side = if c.long_volume >= c.short_volume {
                Side::Sell
            } else {
                Side::Buy
            };
            let step = match side {
                Side::Sell => -0.01,
                Side::Buy => 0.01,
            };
            let trigger_price = price * (1.0 + step);
            let affected_levels = (2..=cfg.affected_levels + 1)
                .map(|i| price * (1.0 + step * i as f64))
                .collect();

            LiquidationCascade {
                coin,
                cluster_price: price,
                side,
                liquidation_count: c.count,
                total_volume: c.total_volume,
                whale_present: c.whale,
                risk,
                trigger_price,
                affected_levels,
                detected_at: now,
            }
        })
        .collect();

    cascades.sort_by(|a, b| {
        b.total_volume
            .partial_cmp(&a.total_volume)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    cascades
}

#[cfg(test)]
mod tests {
    use super::*;

    fn liq(price: f64, notional: f64, side: Side, tier: SizeTier, time: DateTime<Utc>) -> ClassifiedLiquidation {
        ClassifiedLiquidation {
            coin: Coin::Btc,
            side,
            price,
            size: notional / price,
            notional,
            tier,
            cascade_risk: CascadeRisk::Low,
            time,
            id: "l".to_string(),
        }
    }

    fn cfg() -> CascadeConfig {
        CascadeConfig::default()
    }

    #[test]
    fn test_greedy_clustering_and_filter() {
        let now = Utc::now();
        let liqs = vec![
            liq(50_000.0, 60_000.0, Side::Sell, SizeTier::Large, now),
            liq(50_100.0, 50_000.0, Side::Sell, SizeTier::Medium, now),
            liq(50_200.0, 40_000.0, Side::Sell, SizeTier::Medium, now),
            // Far away, alone: filtered out by min_liquidations.
            liq(60_000.0, 500_000.0, Side::Sell, SizeTier::Whale, now),
        ];
        let cascades = detect_cascades(&liqs, Coin::Btc, &cfg(), now);
        assert_eq!(cascades.len(), 1);
        let c = &cascades[0];
        assert_eq!(c.liquidation_count, 3);
        assert!(c.total_volume >= 150_000.0);
        assert_eq!(c.side, Side::Sell);
    }

    #[test]
    fn test_trigger_extends_downward_for_longs() {
        let now = Utc::now();
        let liqs: Vec<_> = (0..4)
            .map(|i| liq(50_000.0 + i as f64, 50_000.0, Side::Sell, SizeTier::Medium, now))
            .collect();
        let cascades = detect_cascades(&liqs, Coin::Btc, &cfg(), now);
        let c = &cascades[0];
        assert!(c.trigger_price < c.cluster_price);
        assert!((c.trigger_price - c.cluster_price * 0.99).abs() < 1.0);
        assert_eq!(c.affected_levels.len(), cfg().affected_levels);
        // Each affected level steps another 1% down.
        for level in &c.affected_levels {
            assert!(*level < c.trigger_price);
        }
    }

    #[test]
    fn test_risk_escalates_with_whale() {
        let now = Utc::now();
        let liqs = vec![
            liq(50_000.0, 1_500_000.0, Side::Sell, SizeTier::Whale, now),
            liq(50_050.0, 50_000.0, Side::Sell, SizeTier::Medium, now),
            liq(50_100.0, 50_000.0, Side::Sell, SizeTier::Medium, now),
        ];
        let cascades = detect_cascades(&liqs, Coin::Btc, &cfg(), now);
        assert_eq!(cascades[0].risk, CascadeRisk::High);
    }

    #[test]
    fn test_old_liquidations_excluded() {
        let now = Utc::now();
        let old = now - ChronoDuration::seconds(600);
        let liqs: Vec<_> = (0..5)
            .map(|_| liq(50_000.0, 100_000.0, Side::Sell, SizeTier::Medium, old))
            .collect();
        assert!(detect_cascades(&liqs, Coin::Btc, &cfg(), now).is_empty());
    }
}
