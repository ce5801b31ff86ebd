//! Gated signal detection.
//!
//! A signal only exists when every confirmation passes. Negative-filter
//! failures are silent by design: they are the expected steady state, not
//! faults. One signal may be outstanding per coin at a time; a new
//! detection cycle cannot start until the consumer dismisses it.

use crate::config::{CoinProfile, SignalConfig};
use crate::detectors::VolumeProfile;
use crate::types::{ClassifiedLiquidation, ClassifiedTrade, Coin, Side, SizeTier};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum SignalDirection {
    Long,
    Short,
}

impl SignalDirection {
    pub fn label(&self) -> &'static str {
        match self {
            SignalDirection::Long => "LONG",
            SignalDirection::Short => "SHORT",
        }
    }

    fn opposite(&self) -> SignalDirection {
        match self {
            SignalDirection::Long => SignalDirection::Short,
            SignalDirection::Short => SignalDirection::Long,
        }
    }
}

/// Which check produced a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum ConfirmationKind {
    CvdDivergence,
    SustainedImbalance,
    LargeOrderCluster,
    LiquidationAbsence,
    PocProximity,
    ValueAreaProximity,
    VolumeNodeProximity,
}

/// Boolean check with its evidence string.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Confirmation {
    pub kind: ConfirmationKind,
    pub met: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Signal {
    pub id: u64,
    pub coin: Coin,
    pub direction: SignalDirection,
    pub entry: f64,
    pub target: f64,
    pub stop: f64,
    /// met/total confirmation ratio.
    pub confidence: f64,
    pub confirmations: Vec<Confirmation>,
    pub created_at: DateTime<Utc>,
}

/// One CVD history point, taken from the aggregator's time series.
#[derive(Debug, Clone, Copy)]
pub struct CvdPoint {
    pub time: DateTime<Utc>,
    pub cvd: f64,
}

/// Per-coin gating state machine.
#[derive(Debug)]
pub struct SignalEngine {
    profile: CoinProfile,
    cfg: SignalConfig,
    next_id: u64,
    active: Option<Signal>,
    /// Emission times inside the rolling hour.
    emitted: VecDeque<DateTime<Utc>>,
    /// Last emission per direction, for the opposite-direction cooldown.
    last_by_direction: [Option<DateTime<Utc>>; 2],
}

impl SignalEngine {
    pub fn new(profile: CoinProfile, cfg: SignalConfig) -> Self {
        Self {
            profile,
            cfg,
            next_id: 0,
            active: None,
            emitted: VecDeque::new(),
            last_by_direction: [None, None],
        }
    }

    pub fn active_signal(&self) -> Option<&Signal> {
        self.active.as_ref()
    }

    /// Consumer resolved or discarded the outstanding signal; detection may
    /// start again on the next tick.
    pub fn dismiss(&mut self) -> Option<Signal> {
        self.active.take()
    }

    /// Run one detection cycle. Returns the newly emitted signal, if any.
    pub fn detect(
        &mut self,
        trades: &[ClassifiedTrade],
        liquidations: &[ClassifiedLiquidation],
        cvd_history: &[CvdPoint],
        volume_profile: Option<&VolumeProfile>,
        current_price: f64,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        // Single-outstanding-signal invariant.
        if self.active.is_some() {
            return None;
        }
        if current_price <= 0.0 {
            return None;
        }

        // Preconditions.
        if trades.len() < self.cfg.min_trades || cvd_history.len() < self.cfg.cvd_min_candles {
            return None;
        }

        // Negative filters: silent aborts.
        if !self.passes_rate_limit(now) {
            return None;
        }
        if !self.passes_volume_filters(trades, now) {
            return None;
        }

        // Confirmations.
        let mut confirmations = vec![
            self.confirm_cvd_divergence(cvd_history),
            self.confirm_sustained_imbalance(trades, now),
            self.confirm_large_order_cluster(trades, now),
            self.confirm_liquidation_absence(liquidations, now),
        ];
        if let Some(profile) = volume_profile {
            confirmations.push(self.confirm_poc_proximity(profile, current_price));
            confirmations.push(self.confirm_value_area_proximity(profile, current_price));
            confirmations.push(self.confirm_volume_node_proximity(profile, current_price));
        }

        let met = confirmations.iter().filter(|c| c.met).count();
        let confidence = met as f64 / confirmations.len() as f64;

        // Strict path: every confirmation must be present.
        if met < confirmations.len() || confidence <= self.cfg.min_confidence {
            debug!(
                coin = %self.profile.coin,
                met,
                total = confirmations.len(),
                "signal gated out"
            );
            return None;
        }

        // Direction comes from the imbalance confirmation's side.
        let direction = self.imbalance_direction(trades, now)?;

        // Opposite-direction cooldown.
        let cooldown = ChronoDuration::seconds(
            self.cfg.opposite_cooldown_candles as i64 * self.cfg.imbalance_window_secs,
        );
        if let Some(last) = self.last_by_direction[direction.opposite() as usize] {
            if now - last < cooldown {
                debug!(coin = %self.profile.coin, "opposite-direction cooldown active");
                return None;
            }
        }

        let (target, stop) = match direction {
            SignalDirection::Long => (
                current_price * (1.0 + self.profile.target_pct),
                current_price * (1.0 - self.profile.stop_pct),
            ),
            SignalDirection::Short => (
                current_price * (1.0 - self.profile.target_pct),
                current_price * (1.0 + self.profile.stop_pct),
            ),
        };

        self.next_id += 1;
        let signal = Signal {
            id: self.next_id,
            coin: self.profile.coin,
            direction,
            entry: current_price,
            target,
            stop,
            confidence,
            confirmations,
            created_at: now,
        };

        self.emitted.push_back(now);
        self.last_by_direction[direction as usize] = Some(now);
        self.active = Some(signal.clone());
        debug!(coin = %self.profile.coin, direction = direction.label(), "signal emitted");
        Some(signal)
    }

    fn passes_rate_limit(&mut self, now: DateTime<Utc>) -> bool {
        let cutoff = now - ChronoDuration::hours(1);
        while let Some(front) = self.emitted.front() {
            if *front < cutoff {
                self.emitted.pop_front();
            } else {
                break;
            }
        }
        self.emitted.len() < self.cfg.max_signals_per_hour
    }

    /// Recent tape must carry institutional-size flow: average notional in
    /// the lookback at least `min_volume_ratio` of the 1h average, and above
    /// the absolute floor.
    fn passes_volume_filters(&self, trades: &[ClassifiedTrade], now: DateTime<Utc>) -> bool {
        let hour_cutoff = now - ChronoDuration::hours(1);
        let recent_cutoff = now - ChronoDuration::seconds(self.cfg.lookback_secs);

        let mut hour_total = 0.0;
        let mut hour_count = 0usize;
        let mut recent_total = 0.0;
        let mut recent_count = 0usize;
        for trade in trades.iter().rev() {
            if trade.time < hour_cutoff {
                break;
            }
            hour_total += trade.notional;
            hour_count += 1;
            if trade.time >= recent_cutoff {
                recent_total += trade.notional;
                recent_count += 1;
            }
        }
        if hour_count == 0 || recent_count == 0 {
            return false;
        }

        let hour_avg = hour_total / hour_count as f64;
        let recent_avg = recent_total / recent_count as f64;
        recent_avg >= hour_avg * self.cfg.min_volume_ratio
            && recent_avg >= self.cfg.min_avg_trade_size
    }

    /// CVD must have visited both sides of zero with enough direction
    /// changes to qualify as divergence rather than a one-way drift.
    fn confirm_cvd_divergence(&self, cvd_history: &[CvdPoint]) -> Confirmation {
        let has_positive = cvd_history.iter().any(|p| p.cvd > 0.0);
        let has_negative = cvd_history.iter().any(|p| p.cvd < 0.0);
        let touches = cvd_history
            .iter()
            .tuple_windows()
            .filter(|(a, b)| a.cvd.signum() != b.cvd.signum() && b.cvd != 0.0)
            .count();
        let met = has_positive && has_negative && touches >= self.cfg.cvd_min_touches;
        Confirmation {
            kind: ConfirmationKind::CvdDivergence,
            met,
            detail: format!(
                "touches={} pos={} neg={}",
                touches, has_positive, has_negative
            ),
        }
    }

    fn window_imbalance(
        &self,
        trades: &[ClassifiedTrade],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Option<(Side, f64)> {
        let mut buy = 0.0;
        let mut sell = 0.0;
        for trade in trades.iter().rev() {
            if trade.time < from {
                break;
            }
            if trade.time >= to {
                continue;
            }
            match trade.side {
                Side::Buy => buy += trade.notional,
                Side::Sell => sell += trade.notional,
            }
        }
        let total = buy + sell;
        if total <= 0.0 {
            return None;
        }
        if buy >= sell {
            Some((Side::Buy, buy / total))
        } else {
            Some((Side::Sell, sell / total))
        }
    }

    /// The aggressive side must hold its share across every one of the
    /// consecutive sub-windows, not just instantaneously.
    fn confirm_sustained_imbalance(
        &self,
        trades: &[ClassifiedTrade],
        now: DateTime<Utc>,
    ) -> Confirmation {
        let mut sides = Vec::with_capacity(self.cfg.imbalance_windows);
        for i in 0..self.cfg.imbalance_windows {
            let to = now - ChronoDuration::seconds(self.cfg.imbalance_window_secs * i as i64);
            let from = to - ChronoDuration::seconds(self.cfg.imbalance_window_secs);
            match self.window_imbalance(trades, from, to) {
                Some((side, share)) if share >= self.cfg.imbalance_threshold => sides.push(side),
                _ => {
                    return Confirmation {
                        kind: ConfirmationKind::SustainedImbalance,
                        met: false,
                        detail: format!("window {} below threshold", i),
                    }
                }
            }
        }
        let met = sides.windows(2).all(|w| w[0] == w[1]);
        Confirmation {
            kind: ConfirmationKind::SustainedImbalance,
            met,
            detail: format!("side={:?} windows={}", sides.first(), sides.len()),
        }
    }

    /// Large orders must cluster on one side with zero opposition.
    fn confirm_large_order_cluster(
        &self,
        trades: &[ClassifiedTrade],
        now: DateTime<Utc>,
    ) -> Confirmation {
        let cutoff = now - ChronoDuration::seconds(self.cfg.lookback_secs);
        let mut buys = 0usize;
        let mut sells = 0usize;
        for trade in trades.iter().rev() {
            if trade.time < cutoff {
                break;
            }
            if trade.notional >= self.profile.large_order_notional {
                match trade.side {
                    Side::Buy => buys += 1,
                    Side::Sell => sells += 1,
                }
            }
        }
        let met = (buys >= self.cfg.cluster_min && sells == 0)
            || (sells >= self.cfg.cluster_min && buys == 0);
        Confirmation {
            kind: ConfirmationKind::LargeOrderCluster,
            met,
            detail: format!("large buys={} sells={}", buys, sells),
        }
    }

    /// No liquidations in the lookback, or enough candles have passed since
    /// the last large one.
    fn confirm_liquidation_absence(
        &self,
        liquidations: &[ClassifiedLiquidation],
        now: DateTime<Utc>,
    ) -> Confirmation {
        let cutoff = now - ChronoDuration::seconds(self.cfg.lookback_secs);
        let recent: Vec<&ClassifiedLiquidation> = liquidations
            .iter()
            .rev()
            .take_while(|l| l.time >= cutoff)
            .collect();

        let met = if recent.is_empty() {
            true
        } else {
            let last_large = recent
                .iter()
                .filter(|l| l.tier >= SizeTier::Large)
                .map(|l| l.time)
                .max();
            match last_large {
                Some(time) => {
                    let elapsed = ChronoDuration::seconds(
                        self.cfg.liq_cooldown_candles as i64 * self.cfg.imbalance_window_secs,
                    );
                    now - time >= elapsed
                }
                // Only small liquidations in the window: acceptable.
                None => true,
            }
        };
        Confirmation {
            kind: ConfirmationKind::LiquidationAbsence,
            met,
            detail: format!("recent={}", recent.len()),
        }
    }

    fn confirm_poc_proximity(&self, profile: &VolumeProfile, price: f64) -> Confirmation {
        let met = (price - profile.poc_price).abs() <= price * self.cfg.profile_proximity;
        Confirmation {
            kind: ConfirmationKind::PocProximity,
            met,
            detail: format!("poc={:.2}", profile.poc_price),
        }
    }

    fn confirm_value_area_proximity(&self, profile: &VolumeProfile, price: f64) -> Confirmation {
        let near_vah =
            (price - profile.value_area_high).abs() <= price * self.cfg.profile_proximity;
        let near_val = (price - profile.value_area_low).abs() <= price * self.cfg.profile_proximity;
        // Inside the value area also counts: price trades at accepted value.
        let inside = price >= profile.value_area_low && price <= profile.value_area_high;
        Confirmation {
            kind: ConfirmationKind::ValueAreaProximity,
            met: near_vah || near_val || inside,
            detail: format!(
                "val={:.2} vah={:.2}",
                profile.value_area_low, profile.value_area_high
            ),
        }
    }

    fn confirm_volume_node_proximity(&self, profile: &VolumeProfile, price: f64) -> Confirmation {
        let nearest = profile
            .markers
            .iter()
            .map(|m| (m.price - price).abs())
            .fold(f64::INFINITY, f64::min);
        // With no interior markers the profile is too flat to object.
        let met = profile.markers.is_empty() || nearest <= price * self.cfg.profile_proximity;
        Confirmation {
            kind: ConfirmationKind::VolumeNodeProximity,
            met,
            detail: format!("nearest_marker_dist={:.2}", nearest),
        }
    }

    fn imbalance_direction(
        &self,
        trades: &[ClassifiedTrade],
        now: DateTime<Utc>,
    ) -> Option<SignalDirection> {
        let to = now;
        let from = to - ChronoDuration::seconds(self.cfg.imbalance_window_secs);
        let (side, share) = self.window_imbalance(trades, from, to)?;
        if share < self.cfg.imbalance_threshold {
            return None;
        }
        Some(match side {
            Side::Buy => SignalDirection::Long,
            Side::Sell => SignalDirection::Short,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoinProfile;

    fn engine() -> SignalEngine {
        SignalEngine::new(CoinProfile::for_coin(Coin::Btc), SignalConfig::default())
    }

    fn trade(price: f64, notional: f64, side: Side, time: DateTime<Utc>) -> ClassifiedTrade {
        let profile = CoinProfile::for_coin(Coin::Btc);
        let tier = if notional >= profile.tiers.whale {
            SizeTier::Whale
        } else if notional >= profile.tiers.large {
            SizeTier::Large
        } else if notional >= profile.tiers.medium {
            SizeTier::Medium
        } else {
            SizeTier::Small
        };
        ClassifiedTrade {
            coin: Coin::Btc,
            side,
            price,
            size: notional / price,
            notional,
            tier,
            time,
            id: "t".to_string(),
        }
    }

    /// A tape that satisfies every base confirmation for a LONG:
    /// 80% buy share in each sub-window, three large buys, no large sells.
    fn qualifying_tape(now: DateTime<Utc>) -> Vec<ClassifiedTrade> {
        let mut trades = Vec::new();
        for w in 0..3i64 {
            let base = now - ChronoDuration::seconds(60 * w + 30);
            // 20 trades per window: 16 buys, 4 sells of equal notional.
            for i in 0..20 {
                let side = if i % 5 == 4 { Side::Sell } else { Side::Buy };
                trades.push(trade(
                    50_000.0,
                    20_000.0,
                    side,
                    base + ChronoDuration::milliseconds(i * 100),
                ));
            }
        }
        // Large buy cluster in the lookback, zero opposing.
        for i in 0..3 {
            trades.push(trade(
                50_000.0,
                250_000.0,
                Side::Buy,
                now - ChronoDuration::seconds(20 + i),
            ));
        }
        trades.sort_by_key(|t| t.time);
        trades
    }

    fn qualifying_cvd(now: DateTime<Utc>) -> Vec<CvdPoint> {
        // Crosses zero twice.
        let values = [-5.0, -2.0, 3.0, 6.0, -1.0, -4.0, 2.0, 5.0, 8.0, 10.0];
        values
            .iter()
            .enumerate()
            .map(|(i, v)| CvdPoint {
                time: now - ChronoDuration::minutes((values.len() - i) as i64),
                cvd: *v * 1_000.0,
            })
            .collect()
    }

    #[test]
    fn test_emits_long_when_everything_aligns() {
        let mut engine = engine();
        let now = Utc::now();
        let signal = engine
            .detect(
                &qualifying_tape(now),
                &[],
                &qualifying_cvd(now),
                None,
                50_000.0,
                now,
            )
            .expect("signal expected");
        assert_eq!(signal.direction, SignalDirection::Long);
        assert!(signal.confidence > 0.95);
        assert_eq!(signal.confirmations.len(), 4);
        assert!(signal.confirmations.iter().all(|c| c.met));
        assert!(signal.target > signal.entry);
        assert!(signal.stop < signal.entry);
    }

    #[test]
    fn test_no_signal_below_min_trades() {
        let mut engine = engine();
        let now = Utc::now();
        let tape: Vec<_> = qualifying_tape(now).into_iter().take(10).collect();
        assert!(engine
            .detect(&tape, &[], &qualifying_cvd(now), None, 50_000.0, now)
            .is_none());
    }

    #[test]
    fn test_one_failed_confirmation_blocks() {
        let mut engine = engine();
        let now = Utc::now();
        let mut tape = qualifying_tape(now);
        // A single opposing large sell kills the cluster confirmation.
        tape.push(trade(
            50_000.0,
            250_000.0,
            Side::Sell,
            now - ChronoDuration::seconds(10),
        ));
        assert!(engine
            .detect(&tape, &[], &qualifying_cvd(now), None, 50_000.0, now)
            .is_none());
    }

    #[test]
    fn test_one_sided_cvd_blocks() {
        let mut engine = engine();
        let now = Utc::now();
        let cvd: Vec<CvdPoint> = (0..10)
            .map(|i| CvdPoint {
                time: now - ChronoDuration::minutes(10 - i),
                cvd: 1_000.0 + i as f64,
            })
            .collect();
        assert!(engine
            .detect(&qualifying_tape(now), &[], &cvd, None, 50_000.0, now)
            .is_none());
    }

    #[test]
    fn test_recent_large_liquidation_blocks() {
        let mut engine = engine();
        let now = Utc::now();
        let liq = ClassifiedLiquidation {
            coin: Coin::Btc,
            side: Side::Sell,
            price: 50_000.0,
            size: 4.0,
            notional: 200_000.0,
            tier: SizeTier::Large,
            cascade_risk: crate::types::CascadeRisk::Low,
            time: now - ChronoDuration::seconds(30),
            id: "l".to_string(),
        };
        assert!(engine
            .detect(
                &qualifying_tape(now),
                &[liq],
                &qualifying_cvd(now),
                None,
                50_000.0,
                now
            )
            .is_none());
    }

    #[test]
    fn test_active_signal_suppresses_detection() {
        let mut engine = engine();
        let now = Utc::now();
        assert!(engine
            .detect(&qualifying_tape(now), &[], &qualifying_cvd(now), None, 50_000.0, now)
            .is_some());
        // Identical qualifying conditions, but a signal is outstanding.
        let later = now + ChronoDuration::minutes(30);
        assert!(engine
            .detect(
                &qualifying_tape(later),
                &[],
                &qualifying_cvd(later),
                None,
                50_000.0,
                later
            )
            .is_none());
        assert!(engine.active_signal().is_some());

        engine.dismiss();
        assert!(engine.active_signal().is_none());
    }

    #[test]
    fn test_hourly_rate_limit() {
        let mut engine = engine();
        let start = Utc::now();
        let mut emitted = 0;
        for i in 0..6 {
            // Space emissions past the opposite/same cooldown concerns and
            // dismiss each so the outstanding invariant never interferes.
            let now = start + ChronoDuration::minutes(i * 9);
            if engine
                .detect(&qualifying_tape(now), &[], &qualifying_cvd(now), None, 50_000.0, now)
                .is_some()
            {
                emitted += 1;
                engine.dismiss();
            }
        }
        // 6 qualifying cycles inside ~45 minutes: the cap holds at 3.
        assert_eq!(emitted, 3);
    }

    #[test]
    fn test_opposite_direction_cooldown() {
        let mut engine = engine();
        let now = Utc::now();
        assert!(engine
            .detect(&qualifying_tape(now), &[], &qualifying_cvd(now), None, 50_000.0, now)
            .is_some());
        engine.dismiss();

        // A SHORT-qualifying tape right after the LONG must be suppressed.
        let later = now + ChronoDuration::minutes(2);
        let mut short_tape = qualifying_tape(later);
        for t in &mut short_tape {
            t.side = match t.side {
                Side::Buy => Side::Sell,
                Side::Sell => Side::Buy,
            };
        }
        assert!(engine
            .detect(&short_tape, &[], &qualifying_cvd(later), None, 50_000.0, later)
            .is_none());

        // Past the cooldown window the SHORT goes through.
        let much_later = now + ChronoDuration::minutes(20);
        let mut short_tape = qualifying_tape(much_later);
        for t in &mut short_tape {
            t.side = match t.side {
                Side::Buy => Side::Sell,
                Side::Sell => Side::Buy,
            };
        }
        let signal = engine
            .detect(&short_tape, &[], &qualifying_cvd(much_later), None, 50_000.0, much_later)
            .expect("short expected after cooldown");
        assert_eq!(signal.direction, SignalDirection::Short);
    }
}
