//! Absorption-zone detection.
//!
//! An absorption zone is a price range where one side keeps eating opposing
//! volume without price getting through. Seeds are the highest-volume
//! dominant nodes; nearby nodes on the same side are merged into the range.

use crate::config::AbsorptionConfig;
use crate::types::{ClassifiedTrade, Coin, DominantSide, LiquidityNode, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ZoneStatus {
    Active,
    Breached,
    Absorbed,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AbsorptionZone {
    pub coin: Coin,
    pub price_low: f64,
    pub price_high: f64,
    /// Volume-weighted center of the merged nodes.
    pub center_price: f64,
    pub side: Side,
    pub total_volume: f64,
    /// Volume that built the zone when it was first detected. Fixed for the
    /// zone's lifetime; the absorbed threshold is measured against it.
    pub initial_volume: f64,
    pub trade_count: u64,
    pub whale_activity: bool,
    /// 0-100.
    pub strength: f64,
    pub status: ZoneStatus,
    /// Same-side volume that has traded inside the range since detection.
    pub absorbed_volume: f64,
    pub detected_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl AbsorptionZone {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.price_low && price <= self.price_high
    }

    fn overlaps(&self, other: &AbsorptionZone) -> bool {
        self.side == other.side
            && self.price_low <= other.price_high
            && other.price_low <= self.price_high
    }
}

fn zone_strength(volume: f64, trade_count: u64, whale: bool, cfg: &AbsorptionConfig) -> f64 {
    let volume_score = (volume / cfg.min_volume * 20.0).min(50.0);
    let count_score = (trade_count as f64 / cfg.min_trade_count as f64 * 10.0).min(30.0);
    let whale_bonus = if whale { 20.0 } else { 0.0 };
    (volume_score + count_score + whale_bonus).min(100.0)
}

/// Freshly detect zones from the current node set. Status continuity across
/// ticks is handled by [`update_zones`] and [`merge_zones`].
pub fn detect_zones(
    nodes: &[LiquidityNode],
    coin: Coin,
    cfg: &AbsorptionConfig,
    now: DateTime<Utc>,
) -> Vec<AbsorptionZone> {
    // Highest dominant volume first so the strongest nodes seed the zones.
    let mut order: Vec<usize> = (0..nodes.len()).collect();
    order.sort_by(|&a, &b| {
        nodes[b]
            .dominant_volume()
            .partial_cmp(&nodes[a].dominant_volume())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut processed = vec![false; nodes.len()];
    let mut zones = Vec::new();

    for &seed_idx in &order {
        if processed[seed_idx] {
            continue;
        }
        let seed = &nodes[seed_idx];
        let side = match seed.dominant_side {
            DominantSide::Buy => Side::Buy,
            DominantSide::Sell => Side::Sell,
            DominantSide::Neutral => continue,
        };
        if seed.dominant_volume() < cfg.min_volume || seed.trade_count() < cfg.min_trade_count {
            continue;
        }
        processed[seed_idx] = true;

        let range = seed.price * cfg.price_range;
        let mut low = seed.price;
        let mut high = seed.price;
        let mut volume = seed.dominant_volume();
        let mut count = seed.trade_count();
        let mut whale = seed.whale_activity;
        let mut weighted_price = seed.price * seed.dominant_volume();

        for (idx, node) in nodes.iter().enumerate() {
            if processed[idx] {
                continue;
            }
            let same_side = matches!(
                (node.dominant_side, side),
                (DominantSide::Buy, Side::Buy) | (DominantSide::Sell, Side::Sell)
            );
            if !same_side || (node.price - seed.price).abs() > range {
                continue;
            }
            processed[idx] = true;
            low = low.min(node.price);
            high = high.max(node.price);
            volume += node.dominant_volume();
            count += node.trade_count();
            whale |= node.whale_activity;
            weighted_price += node.price * node.dominant_volume();
        }

        let strength = zone_strength(volume, count, whale, cfg);
        if strength < cfg.min_strength {
            continue;
        }

        zones.push(AbsorptionZone {
            coin,
            price_low: (seed.price - range).min(low),
            price_high: (seed.price + range).max(high),
            center_price: if volume > 0.0 {
                weighted_price / volume
            } else {
                seed.price
            },
            side,
            total_volume: volume,
            initial_volume: volume,
            trade_count: count,
            whale_activity: whale,
            strength,
            status: ZoneStatus::Active,
            absorbed_volume: 0.0,
            detected_at: now,
            last_update: now,
        });
    }

    zones
}

/// Advance zone statuses with trades seen since the previous tick.
///
/// A buy-dominant zone is support: it breaches when price falls through the
/// bottom of the range. It becomes absorbed once same-side volume traded
/// inside the range exceeds half the volume that built it.
pub fn update_zones(
    zones: &mut [AbsorptionZone],
    new_trades: &[ClassifiedTrade],
    current_price: f64,
    now: DateTime<Utc>,
) {
    for zone in zones.iter_mut() {
        if zone.status != ZoneStatus::Active {
            continue;
        }

        for trade in new_trades {
            if trade.side == zone.side && zone.contains(trade.price) {
                zone.absorbed_volume += trade.notional;
            }
        }

        let breached = match zone.side {
            Side::Buy => current_price < zone.price_low,
            Side::Sell => current_price > zone.price_high,
        };
        if breached {
            zone.status = ZoneStatus::Breached;
        } else if zone.absorbed_volume > zone.initial_volume * 0.5 {
            zone.status = ZoneStatus::Absorbed;
        }
        zone.last_update = now;
    }
}

/// Merge a fresh detection pass into the carried zone list.
///
/// Existing zones keep their status, absorption tally, and initial volume;
/// a fresh zone that overlaps an active one refreshes its current volume and
/// strength, otherwise it is appended.
pub fn merge_zones(existing: Vec<AbsorptionZone>, fresh: Vec<AbsorptionZone>) -> Vec<AbsorptionZone> {
    let mut merged = existing;
    for candidate in fresh {
        match merged
            .iter_mut()
            .find(|z| z.status == ZoneStatus::Active && z.overlaps(&candidate))
        {
            Some(zone) => {
                zone.total_volume = candidate.total_volume;
                zone.trade_count = candidate.trade_count;
                zone.whale_activity |= candidate.whale_activity;
                zone.strength = candidate.strength;
                zone.price_low = zone.price_low.min(candidate.price_low);
                zone.price_high = zone.price_high.max(candidate.price_high);
                zone.last_update = candidate.last_update;
            }
            None => merged.push(candidate),
        }
    }
    merged
}
