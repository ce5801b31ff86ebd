//! Volume profile: POC, value area, and high/low-volume node markers.

use crate::config::{CoinProfile, VolumeProfileConfig};
use crate::types::{ClassifiedTrade, Coin, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One price bucket of the profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileLevel {
    pub bucket: i64,
    pub price: f64,
    pub volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum MarkerKind {
    HighVolumeNode,
    LowVolumeNode,
}

/// Local peak/trough in the profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileMarker {
    pub price: f64,
    pub volume: f64,
    pub kind: MarkerKind,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VolumeProfile {
    pub coin: Coin,
    /// Ascending by bucket.
    pub levels: Vec<ProfileLevel>,
    pub poc_price: f64,
    pub value_area_high: f64,
    pub value_area_low: f64,
    pub total_volume: f64,
    pub value_area_volume: f64,
    pub markers: Vec<ProfileMarker>,
    pub generated_at: DateTime<Utc>,
}

/// Build the profile from windowed trades. Returns `None` when there is no
/// usable volume.
pub fn build_profile(
    trades: &[ClassifiedTrade],
    profile: &CoinProfile,
    cfg: &VolumeProfileConfig,
    now: DateTime<Utc>,
) -> Option<VolumeProfile> {
    let mut buckets: BTreeMap<i64, ProfileLevel> = BTreeMap::new();
    for trade in trades {
        if trade.price <= 0.0 || trade.notional <= 0.0 {
            continue;
        }
        let bucket = (trade.price / profile.grid_size).round() as i64;
        let level = buckets.entry(bucket).or_insert_with(|| ProfileLevel {
            bucket,
            price: bucket as f64 * profile.grid_size,
            volume: 0.0,
            buy_volume: 0.0,
            sell_volume: 0.0,
        });
        level.volume += trade.notional;
        match trade.side {
            Side::Buy => level.buy_volume += trade.notional,
            Side::Sell => level.sell_volume += trade.notional,
        }
    }

    let levels: Vec<ProfileLevel> = buckets.into_values().collect();
    let total_volume: f64 = levels.iter().map(|l| l.volume).sum();
    if levels.is_empty() || total_volume <= 0.0 {
        return None;
    }

    // POC: highest-volume bucket.
    let poc_idx = levels
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.volume.partial_cmp(&b.volume).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)?;

    // Expand outward from the POC toward whichever neighbour bucket holds
    // more volume, until the value area covers the configured share.
    let target = cfg.value_area_percentage * total_volume;
    let mut low_idx = poc_idx;
    let mut high_idx = poc_idx;
    let mut value_area_volume = levels[poc_idx].volume;

    while value_area_volume < target {
        let below = (low_idx > 0).then(|| levels[low_idx - 1].volume);
        let above = (high_idx + 1 < levels.len()).then(|| levels[high_idx + 1].volume);
        match (below, above) {
            (Some(b), Some(a)) if b >= a => {
                low_idx -= 1;
                value_area_volume += b;
            }
            (Some(_), Some(a)) => {
                high_idx += 1;
                value_area_volume += a;
            }
            (Some(b), None) => {
                low_idx -= 1;
                value_area_volume += b;
            }
            (None, Some(a)) => {
                high_idx += 1;
                value_area_volume += a;
            }
            (None, None) => break,
        }
    }

    let markers = find_markers(&levels);

    Some(VolumeProfile {
        coin: profile.coin,
        poc_price: levels[poc_idx].price,
        value_area_high: levels[high_idx].price,
        value_area_low: levels[low_idx].price,
        total_volume,
        value_area_volume,
        markers,
        levels,
        generated_at: now,
    })
}

/// HVN/LVN markers: buckets whose volume is a strict local peak or trough
/// against both immediate neighbours.
fn find_markers(levels: &[ProfileLevel]) -> Vec<ProfileMarker> {
    let mut markers = Vec::new();
    for i in 1..levels.len().saturating_sub(1) {
        let (prev, here, next) = (&levels[i - 1], &levels[i], &levels[i + 1]);
        if here.volume > prev.volume && here.volume > next.volume {
            markers.push(ProfileMarker {
                price: here.price,
                volume: here.volume,
                kind: MarkerKind::HighVolumeNode,
            });
        } else if here.volume < prev.volume && here.volume < next.volume {
            markers.push(ProfileMarker {
                price: here.price,
                volume: here.volume,
                kind: MarkerKind::LowVolumeNode,
            });
        }
    }
    markers
}
