//! Support/resistance detection from local price extrema.
//!
//! Touches are trades that are local maxima or minima against their
//! immediate neighbours; touch clusters become levels. `is_breached`
//! latches permanently the first time price crosses 0.5% past a level.

use crate::config::SupportResistanceConfig;
use crate::types::{ClassifiedTrade, Coin, LiquidityNode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum LevelKind {
    Support,
    Resistance,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupportResistanceLevel {
    pub coin: Coin,
    pub price: f64,
    pub kind: LevelKind,
    pub touch_count: usize,
    /// Fraction of touches that price moved away from afterwards.
    pub bounce_ratio: f64,
    pub total_volume: f64,
    /// 0-100.
    pub strength: f64,
    pub is_breached: bool,
    pub first_touch: DateTime<Utc>,
    pub last_touch: DateTime<Utc>,
}

struct Touch {
    price: f64,
    time: DateTime<Utc>,
    volume: f64,
    bounced: bool,
}

/// Extract local extrema as touches. A touch "bounced" if price moved away
/// from the extreme by at least 0.1% within the next few trades.
fn extract_touches(trades: &[ClassifiedTrade]) -> Vec<Touch> {
    let mut touches = Vec::new();
    for i in 1..trades.len().saturating_sub(1) {
        let prev = trades[i - 1].price;
        let here = trades[i].price;
        let next = trades[i + 1].price;
        let is_max = here > prev && here > next;
        let is_min = here < prev && here < next;
        if !is_max && !is_min {
            continue;
        }

        let bounced = trades[i + 1..]
            .iter()
            .take(5)
            .any(|t| (t.price - here).abs() >= here * 0.001);

        touches.push(Touch {
            price: here,
            time: trades[i].time,
            volume: trades[i].notional,
            bounced,
        });
    }
    touches
}

/// Liquidity resting near a level, from the node map.
fn colocated_volume(nodes: &[LiquidityNode], price: f64, range: f64) -> f64 {
    nodes
        .iter()
        .filter(|n| (n.price - price).abs() <= price * range)
        .map(|n| n.total_volume())
        .sum()
}

fn level_strength(
    touch_count: usize,
    volume: f64,
    bounce_ratio: f64,
    node_volume: f64,
    age_secs: f64,
    cfg: &SupportResistanceConfig,
) -> f64 {
    let touch_score = (touch_count as f64 / cfg.min_touches as f64 * 15.0).min(35.0);
    let volume_score = (volume / cfg.min_volume * 5.0).min(20.0);
    let bounce_score = bounce_ratio * 20.0;
    let liquidity_score = (node_volume / cfg.min_volume * 2.5).min(15.0);
    let decay = (-age_secs * std::f64::consts::LN_2 / cfg.decay_half_life_secs).exp();
    ((touch_score + volume_score + bounce_score + liquidity_score) * (0.5 + 0.5 * decay)).min(100.0)
}

/// Freshly detect levels from the trade sequence and node map.
pub fn detect_levels(
    trades: &[ClassifiedTrade],
    nodes: &[LiquidityNode],
    coin: Coin,
    current_price: f64,
    cfg: &SupportResistanceConfig,
    now: DateTime<Utc>,
) -> Vec<SupportResistanceLevel> {
    if current_price <= 0.0 {
        return Vec::new();
    }
    let touches = extract_touches(trades);

    // Same greedy single-pass clustering as the cascade calculator.
    struct Cluster {
        anchor: f64,
        weighted: f64,
        volume: f64,
        count: usize,
        bounces: usize,
        first: DateTime<Utc>,
        last: DateTime<Utc>,
    }
    let mut clusters: Vec<Cluster> = Vec::new();
    for touch in &touches {
        match clusters
            .iter_mut()
            .find(|c| (touch.price - c.anchor).abs() <= touch.price * cfg.cluster_range)
        {
            Some(c) => {
                c.weighted += touch.price * touch.volume.max(1.0);
                c.volume += touch.volume;
                c.count += 1;
                c.bounces += touch.bounced as usize;
                c.first = c.first.min(touch.time);
                c.last = c.last.max(touch.time);
            }
            None => clusters.push(Cluster {
                anchor: touch.price,
                weighted: touch.price * touch.volume.max(1.0),
                volume: touch.volume,
                count: 1,
                bounces: touch.bounced as usize,
                first: touch.time,
                last: touch.time,
            }),
        }
    }

    clusters
        .into_iter()
        .filter(|c| c.count >= cfg.min_touches && c.volume >= cfg.min_volume)
        .map(|c| {
            let price = if c.volume > 0.0 {
                c.weighted / c.volume.max(1.0)
            } else {
                c.anchor
            };
            let kind = if price < current_price {
                LevelKind::Support
            } else {
                LevelKind::Resistance
            };
            let bounce_ratio = c.bounces as f64 / c.count as f64;
            let node_volume = colocated_volume(nodes, price, cfg.cluster_range);
            let age_secs = (now - c.last).num_seconds().max(0) as f64;

            SupportResistanceLevel {
                coin,
                price,
                kind,
                touch_count: c.count,
                bounce_ratio,
                total_volume: c.volume,
                strength: level_strength(c.count, c.volume, bounce_ratio, node_volume, age_secs, cfg),
                is_breached: false,
                first_touch: c.first,
                last_touch: c.last,
            }
        })
        .collect()
}

/// Latch breaches from trades seen since the previous tick. Breach is
/// permanent: a support breaks when a trade prints 0.5% below it, a
/// resistance when one prints 0.5% above.
pub fn update_levels(
    levels: &mut [SupportResistanceLevel],
    new_trades: &[ClassifiedTrade],
    cfg: &SupportResistanceConfig,
) {
    for level in levels.iter_mut() {
        if level.is_breached {
            continue;
        }
        let breached = new_trades.iter().any(|t| match level.kind {
            LevelKind::Support => t.price <= level.price * (1.0 - cfg.breach_pct),
            LevelKind::Resistance => t.price >= level.price * (1.0 + cfg.breach_pct),
        });
        if breached {
            level.is_breached = true;
        }
    }
}

/// Merge a fresh detection pass into the carried levels, preserving the
/// breach latch and first-touch time of surviving levels.
pub fn merge_levels(
    existing: Vec<SupportResistanceLevel>,
    fresh: Vec<SupportResistanceLevel>,
    cfg: &SupportResistanceConfig,
) -> Vec<SupportResistanceLevel> {
    let mut merged: Vec<SupportResistanceLevel> = Vec::with_capacity(fresh.len());
    for candidate in fresh {
        let carried = existing
            .iter()
            .find(|l| (l.price - candidate.price).abs() <= candidate.price * cfg.cluster_range);
        match carried {
            Some(prev) => merged.push(SupportResistanceLevel {
                is_breached: prev.is_breached,
                first_touch: prev.first_touch.min(candidate.first_touch),
                touch_count: candidate.touch_count.max(prev.touch_count),
                ..candidate
            }),
            None => merged.push(candidate),
        }
    }
    // Keep breached levels that the fresh pass no longer sees; consumers
    // want to know a level broke even after its touches age out.
    for prev in existing.into_iter().filter(|l| l.is_breached) {
        let seen = merged
            .iter()
            .any(|l| (l.price - prev.price).abs() <= prev.price * cfg.cluster_range);
        if !seen {
            merged.push(prev);
        }
    }
    merged
}
