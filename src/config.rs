//! Per-coin constant tables and tunable component configs.
//!
//! Everything is an explicit struct handed to the pipeline at construction;
//! a small number of thresholds can be overridden through environment
//! variables for live tuning without a rebuild.

use crate::types::Coin;
use std::sync::OnceLock;

/// Size-tier thresholds in USD notional.
#[derive(Debug, Clone, Copy)]
pub struct TierThresholds {
    pub medium: f64,
    pub large: f64,
    pub whale: f64,
}

/// Fixed per-coin constants: price grid, tier table, and exit distances.
#[derive(Debug, Clone, Copy)]
pub struct CoinProfile {
    pub coin: Coin,
    /// Price grid for liquidity buckets and the volume profile.
    pub grid_size: f64,
    pub tiers: TierThresholds,
    /// Notional above which a trade counts as a "large order" for signal
    /// clustering (below the whale tier).
    pub large_order_notional: f64,
    /// Target distance as a fraction of entry price.
    pub target_pct: f64,
    /// Stop distance as a fraction of entry price.
    pub stop_pct: f64,
}

impl CoinProfile {
    pub fn for_coin(coin: Coin) -> CoinProfile {
        match coin {
            Coin::Btc => CoinProfile {
                coin,
                grid_size: 100.0,
                tiers: TierThresholds {
                    medium: 10_000.0,
                    large: 100_000.0,
                    whale: whale_override(coin).unwrap_or(1_000_000.0),
                },
                large_order_notional: 100_000.0,
                target_pct: 0.01,
                stop_pct: 0.005,
            },
            Coin::Eth => CoinProfile {
                coin,
                grid_size: 10.0,
                tiers: TierThresholds {
                    medium: 5_000.0,
                    large: 50_000.0,
                    whale: whale_override(coin).unwrap_or(500_000.0),
                },
                large_order_notional: 50_000.0,
                target_pct: 0.012,
                stop_pct: 0.006,
            },
            Coin::Hype => CoinProfile {
                coin,
                grid_size: 0.05,
                tiers: TierThresholds {
                    medium: 1_000.0,
                    large: 10_000.0,
                    whale: whale_override(coin).unwrap_or(100_000.0),
                },
                large_order_notional: 10_000.0,
                target_pct: 0.02,
                stop_pct: 0.01,
            },
        }
    }
}

/// Per-coin whale threshold override (env: WHALE_BTC / WHALE_ETH / WHALE_HYPE).
fn whale_override(coin: Coin) -> Option<f64> {
    std::env::var(format!("WHALE_{}", coin.as_str()))
        .ok()
        .and_then(|v| v.parse().ok())
}

/// Retention caps for the per-coin record rings (env: MAX_TRADES / MAX_LIQS).
pub fn max_trades() -> usize {
    static MAX_TRADES: OnceLock<usize> = OnceLock::new();
    *MAX_TRADES.get_or_init(|| {
        std::env::var("MAX_TRADES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10_000)
    })
}

pub fn max_liquidations() -> usize {
    static MAX_LIQS: OnceLock<usize> = OnceLock::new();
    *MAX_LIQS.get_or_init(|| {
        std::env::var("MAX_LIQS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1_000)
    })
}

/// Absorption-zone detector tuning.
#[derive(Debug, Clone, Copy)]
pub struct AbsorptionConfig {
    /// Minimum dominant-side volume for a seed node (USD).
    pub min_volume: f64,
    pub min_trade_count: u64,
    /// Half-width of the absorption range as a fraction of price.
    pub price_range: f64,
    /// Emit threshold on the 0-100 strength score.
    pub min_strength: f64,
}

impl Default for AbsorptionConfig {
    fn default() -> Self {
        Self {
            min_volume: 50_000.0,
            min_trade_count: 10,
            price_range: 0.002,
            min_strength: 40.0,
        }
    }
}

/// Liquidation-cascade calculator tuning.
#[derive(Debug, Clone, Copy)]
pub struct CascadeConfig {
    /// Trailing window over liquidations, seconds.
    pub window_secs: i64,
    /// Cluster proximity as a fraction of price.
    pub cluster_range: f64,
    pub min_liquidations: usize,
    pub min_volume: f64,
    /// Number of 1% price steps projected beyond the trigger.
    pub affected_levels: usize,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            cluster_range: 0.005,
            min_liquidations: 3,
            min_volume: 100_000.0,
            affected_levels: 3,
        }
    }
}

/// Support/resistance detector tuning.
#[derive(Debug, Clone, Copy)]
pub struct SupportResistanceConfig {
    /// Cluster proximity as a fraction of price.
    pub cluster_range: f64,
    pub min_touches: usize,
    pub min_volume: f64,
    /// Cross distance (fraction of level price) that latches a breach.
    pub breach_pct: f64,
    /// Exponential decay half-life for touch recency, seconds.
    pub decay_half_life_secs: f64,
}

impl Default for SupportResistanceConfig {
    fn default() -> Self {
        Self {
            cluster_range: 0.003,
            min_touches: 3,
            min_volume: 10_000.0,
            breach_pct: 0.005,
            decay_half_life_secs: 1800.0,
        }
    }
}

/// Volume-profile tuning.
#[derive(Debug, Clone, Copy)]
pub struct VolumeProfileConfig {
    /// Fraction of total volume the value area must cover.
    pub value_area_percentage: f64,
}

impl Default for VolumeProfileConfig {
    fn default() -> Self {
        Self {
            value_area_percentage: 0.70,
        }
    }
}

/// Mean-reversion detector tuning.
#[derive(Debug, Clone, Copy)]
pub struct MeanReversionConfig {
    /// Trades considered for mean/std-dev.
    pub lookback: usize,
    /// |z| at which a setup becomes a candidate.
    pub deviation_threshold: f64,
    /// Emit threshold on the reversion probability.
    pub min_confidence: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            lookback: 200,
            deviation_threshold: 2.0,
            min_confidence: 0.65,
        }
    }
}

/// Signal-engine gating thresholds.
#[derive(Debug, Clone, Copy)]
pub struct SignalConfig {
    /// Minimum retained trades before any evaluation.
    pub min_trades: usize,
    /// Minimum CVD history points before any evaluation.
    pub cvd_min_candles: usize,
    /// Hard cap on emissions per rolling hour per coin.
    pub max_signals_per_hour: usize,
    /// Recent avg notional must be at least this multiple of the 1h avg.
    pub min_volume_ratio: f64,
    /// Minimum average trade notional (filters retail-dominated tape).
    pub min_avg_trade_size: f64,
    /// Buy or sell share that counts as aggressive imbalance.
    pub imbalance_threshold: f64,
    /// Consecutive sub-windows the imbalance must hold.
    pub imbalance_windows: usize,
    /// Sub-window width, seconds.
    pub imbalance_window_secs: i64,
    /// Minimum one-sided large orders for the clustering confirmation.
    pub cluster_min: usize,
    /// Lookback for large-order clustering and liquidation absence, seconds.
    pub lookback_secs: i64,
    /// Minimum zero-cross touches for CVD divergence.
    pub cvd_min_touches: usize,
    /// Candles that must elapse after a large liquidation.
    pub liq_cooldown_candles: usize,
    /// Proximity (fraction of price) for the volume-profile confirmations.
    pub profile_proximity: f64,
    /// Required met/total confirmation ratio (strictly greater than).
    pub min_confidence: f64,
    /// Candles during which an opposite-direction signal is suppressed.
    pub opposite_cooldown_candles: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_trades: 50,
            cvd_min_candles: 10,
            max_signals_per_hour: 3,
            min_volume_ratio: 0.8,
            min_avg_trade_size: 5_000.0,
            imbalance_threshold: 0.75,
            imbalance_windows: 3,
            imbalance_window_secs: 60,
            cluster_min: 3,
            lookback_secs: 300,
            cvd_min_touches: 2,
            liq_cooldown_candles: 5,
            profile_proximity: 0.01,
            min_confidence: 0.95,
            opposite_cooldown_candles: 10,
        }
    }
}

/// Alert-manager filtering and expiry.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub min_severity: crate::alerts::AlertSeverity,
    /// Kinds allowed through; empty means all.
    pub enabled_kinds: Vec<crate::alerts::AlertKind>,
    /// Auto-acknowledge delay, seconds. None disables expiry.
    pub ttl_secs: Option<i64>,
    /// Window within which identical alerts are collapsed, seconds.
    pub dedup_secs: i64,
    /// Ring cap on retained alerts.
    pub max_alerts: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            min_severity: crate::alerts::AlertSeverity::Info,
            enabled_kinds: Vec::new(),
            ttl_secs: Some(300),
            dedup_secs: 60,
            max_alerts: 500,
        }
    }
}

/// Top-level engine configuration: one bundle per coin pipeline.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Raw-record retention, seconds (default 4h).
    pub retention_secs: i64,
    /// Aggregation sub-interval for the time series, milliseconds.
    pub series_interval_ms: i64,
    /// Detector/signal poll cadence, seconds.
    pub poll_secs: u64,
    /// Prune cadence, seconds.
    pub prune_secs: u64,
    /// Snapshot-recording cadence, seconds.
    pub snapshot_secs: u64,
    pub absorption: AbsorptionConfig,
    pub cascade: CascadeConfig,
    pub support_resistance: SupportResistanceConfig,
    pub volume_profile: VolumeProfileConfig,
    pub mean_reversion: MeanReversionConfig,
    pub signal: SignalConfig,
    pub alerts: AlertConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention_secs: 4 * 3600,
            series_interval_ms: 60_000,
            poll_secs: 5,
            prune_secs: 60,
            snapshot_secs: 30,
            absorption: AbsorptionConfig::default(),
            cascade: CascadeConfig::default(),
            support_resistance: SupportResistanceConfig::default(),
            volume_profile: VolumeProfileConfig::default(),
            mean_reversion: MeanReversionConfig::default(),
            signal: SignalConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_ordered_tiers() {
        for coin in Coin::all() {
            let p = CoinProfile::for_coin(coin);
            assert!(p.tiers.medium < p.tiers.large);
            assert!(p.tiers.large < p.tiers.whale);
            assert!(p.grid_size > 0.0);
        }
    }

    #[test]
    fn test_btc_whale_default() {
        let p = CoinProfile::for_coin(Coin::Btc);
        assert_eq!(p.tiers.whale, 1_000_000.0);
    }
}
