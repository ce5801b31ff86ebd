//! Mean-reversion setup detection.
//!
//! Flags stretched prices via a volume-weighted z-score and estimates the
//! reversion probability with a logistic curve, nudged by volume drying up
//! and momentum slowing down.

use crate::config::MeanReversionConfig;
use crate::types::{ClassifiedTrade, Coin};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ReversionCondition {
    Overbought,
    Oversold,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeanReversionSetup {
    pub coin: Coin,
    pub condition: ReversionCondition,
    pub mean: f64,
    pub std_dev: f64,
    /// Signed deviation in standard deviations.
    pub z_score: f64,
    pub current_price: f64,
    /// 0-1 reversion probability.
    pub probability: f64,
    pub detected_at: DateTime<Utc>,
}

/// Volume-weighted mean and standard deviation of trade prices.
fn weighted_stats(trades: &[&ClassifiedTrade]) -> Option<(f64, f64)> {
    let total_weight: f64 = trades.iter().map(|t| t.notional).sum();
    if trades.len() < 2 || total_weight <= 0.0 {
        return None;
    }
    let mean = trades
        .iter()
        .map(|t| t.price * t.notional)
        .sum::<f64>()
        / total_weight;
    let variance = trades
        .iter()
        .map(|t| t.notional * (t.price - mean).powi(2))
        .sum::<f64>()
        / total_weight;
    let std_dev = variance.sqrt();
    (std_dev > 1e-9).then_some((mean, std_dev))
}

/// Detect a reversion setup over the trailing `lookback` trades.
pub fn detect_reversion(
    trades: &[ClassifiedTrade],
    coin: Coin,
    current_price: f64,
    cfg: &MeanReversionConfig,
    now: DateTime<Utc>,
) -> Option<MeanReversionSetup> {
    if current_price <= 0.0 {
        return None;
    }
    let window: Vec<&ClassifiedTrade> = trades
        .iter()
        .rev()
        .take(cfg.lookback)
        .filter(|t| t.price > 0.0)
        .collect();
    let (mean, std_dev) = weighted_stats(&window)?;

    let z = (current_price - mean) / std_dev;
    if z.abs() < cfg.deviation_threshold {
        return None;
    }

    // Logistic of the excess deviation: 0.5 at the threshold, approaching 1
    // as the stretch grows.
    let excess = z.abs() - cfg.deviation_threshold;
    let mut probability = 1.0 / (1.0 + (-1.5 * excess).exp());

    // Drying volume favours reversion; accelerating volume argues the move
    // is real. Compare the most recent quarter against the rest.
    let split = window.len() / 4;
    if split > 0 {
        let recent_avg: f64 =
            window[..split].iter().map(|t| t.notional).sum::<f64>() / split as f64;
        let older_avg: f64 = window[split..].iter().map(|t| t.notional).sum::<f64>()
            / (window.len() - split) as f64;
        if older_avg > 0.0 {
            if recent_avg < older_avg * 0.7 {
                probability += 0.10;
            } else if recent_avg > older_avg * 1.5 {
                probability -= 0.10;
            }
        }

        // Momentum slowdown: recent per-trade drift smaller than before.
        let drift = |chunk: &[&ClassifiedTrade]| -> f64 {
            if chunk.len() < 2 {
                return 0.0;
            }
            chunk
                .windows(2)
                .map(|w| (w[0].price - w[1].price).abs())
                .sum::<f64>()
                / (chunk.len() - 1) as f64
        };
        let recent_drift = drift(&window[..split.max(2)]);
        let older_drift = drift(&window[split..]);
        if older_drift > 0.0 && recent_drift < older_drift * 0.5 {
            probability += 0.05;
        }
    }

    let probability = probability.clamp(0.0, 1.0);
    if probability < cfg.min_confidence {
        return None;
    }

    Some(MeanReversionSetup {
        coin,
        condition: if z > 0.0 {
            ReversionCondition::Overbought
        } else {
            ReversionCondition::Oversold
        },
        mean,
        std_dev,
        z_score: z,
        current_price,
        probability,
        detected_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Side, SizeTier};

    fn trade(price: f64, notional: f64) -> ClassifiedTrade {
        ClassifiedTrade {
            coin: Coin::Btc,
            side: Side::Buy,
            price,
            size: notional / price,
            notional,
            tier: SizeTier::Small,
            time: Utc::now(),
            id: "t".to_string(),
        }
    }

    fn cfg() -> MeanReversionConfig {
        MeanReversionConfig {
            min_confidence: 0.6,
            ..MeanReversionConfig::default()
        }
    }

    /// Tight tape around 50_000 with small noise.
    fn base_tape() -> Vec<ClassifiedTrade> {
        (0..100)
            .map(|i| trade(50_000.0 + ((i % 5) as f64 - 2.0) * 10.0, 10_000.0))
            .collect()
    }

    #[test]
    fn test_no_setup_inside_band() {
        let tape = base_tape();
        assert!(detect_reversion(&tape, Coin::Btc, 50_005.0, &cfg(), Utc::now()).is_none());
    }

    #[test]
    fn test_overbought_far_above_mean() {
        let tape = base_tape();
        let setup = detect_reversion(&tape, Coin::Btc, 50_120.0, &cfg(), Utc::now())
            .expect("setup expected");
        assert_eq!(setup.condition, ReversionCondition::Overbought);
        assert!(setup.z_score > 2.0);
        assert!(setup.probability >= 0.6);
    }

    #[test]
    fn test_oversold_sign() {
        let tape = base_tape();
        let setup = detect_reversion(&tape, Coin::Btc, 49_880.0, &cfg(), Utc::now())
            .expect("setup expected");
        assert_eq!(setup.condition, ReversionCondition::Oversold);
        assert!(setup.z_score < -2.0);
    }

    #[test]
    fn test_insufficient_sample_is_empty() {
        let tape = vec![trade(50_000.0, 10_000.0)];
        assert!(detect_reversion(&tape, Coin::Btc, 60_000.0, &cfg(), Utc::now()).is_none());
    }
}
