//! Classification of raw wire records into size-tiered, strongly-typed
//! trades and liquidations.
//!
//! Pure functions with no failure path: malformed numeric fields classify
//! as zero-notional `Small` records rather than being dropped, since losing
//! tape would bias every downstream aggregate.

use crate::config::CoinProfile;
use crate::types::{
    CascadeRisk, ClassifiedLiquidation, ClassifiedTrade, Coin, RawLiquidation, RawTrade, Side,
    SizeTier,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Proximity window for the cascade-risk hint: liquidations within the last
/// 60s and within ±0.1% of price count as "nearby".
const CASCADE_HINT_SECS: i64 = 60;
const CASCADE_HINT_PROXIMITY: f64 = 0.001;

fn parse_f64(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}

fn parse_time(ms: i64, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(fallback)
}

fn trade_side(flag: &str) -> Side {
    // Exchange flag: B = aggressive buy, A = hit the ask's counterparty.
    match flag.trim().to_uppercase().as_str() {
        "B" | "BUY" => Side::Buy,
        _ => Side::Sell,
    }
}

fn liquidation_side(flag: &str) -> Side {
    // A liquidated long is force-sold into the bid; a short is bought back.
    match flag.trim().to_lowercase().as_str() {
        "short" => Side::Buy,
        _ => Side::Sell,
    }
}

fn tier_for(notional: f64, profile: &CoinProfile) -> SizeTier {
    if notional >= profile.tiers.whale {
        SizeTier::Whale
    } else if notional >= profile.tiers.large {
        SizeTier::Large
    } else if notional >= profile.tiers.medium {
        SizeTier::Medium
    } else {
        SizeTier::Small
    }
}

/// Classify one raw trade. `now` is the fallback timestamp for records with
/// an unparseable time field.
pub fn classify_trade(raw: &RawTrade, profile: &CoinProfile, now: DateTime<Utc>) -> ClassifiedTrade {
    let price = parse_f64(&raw.price);
    let size = parse_f64(&raw.size);
    let notional = if price > 0.0 && size > 0.0 {
        price * size
    } else {
        0.0
    };

    ClassifiedTrade {
        coin: Coin::parse(&raw.coin).unwrap_or(profile.coin),
        side: trade_side(&raw.side),
        price,
        size,
        notional,
        tier: tier_for(notional, profile),
        time: parse_time(raw.time, now),
        id: raw.id.clone(),
    }
}

/// Classify one raw liquidation. `recent` is the bounded window of already
/// classified liquidations used for the cascade-risk hint.
pub fn classify_liquidation(
    raw: &RawLiquidation,
    profile: &CoinProfile,
    recent: &[ClassifiedLiquidation],
    now: DateTime<Utc>,
) -> ClassifiedLiquidation {
    let price = parse_f64(&raw.price);
    let size = parse_f64(&raw.size);
    let notional = if price > 0.0 && size > 0.0 {
        price * size
    } else {
        0.0
    };
    let tier = tier_for(notional, profile);
    let time = parse_time(raw.time, now);

    let cutoff = time - ChronoDuration::seconds(CASCADE_HINT_SECS);
    let nearby = recent
        .iter()
        .rev()
        .take_while(|l| l.time >= cutoff)
        .filter(|l| price > 0.0 && (l.price - price).abs() <= price * CASCADE_HINT_PROXIMITY)
        .count();

    let cascade_risk = if nearby >= 3 && tier != SizeTier::Small {
        CascadeRisk::High
    } else if nearby >= 2 || tier == SizeTier::Whale {
        CascadeRisk::Medium
    } else {
        CascadeRisk::Low
    };

    ClassifiedLiquidation {
        coin: Coin::parse(&raw.coin).unwrap_or(profile.coin),
        side: liquidation_side(&raw.side),
        price,
        size,
        notional,
        tier,
        cascade_risk,
        time,
        id: raw.id.clone(),
    }
}
