//! Pipeline orchestration.
//!
//! One [`CoinPipeline`] per tracked coin owns that coin's aggregator,
//! detector state, signal engine, alerts, and playback ring. Coins never
//! share state. [`MarketEngine`] routes raw feed records to pipelines and
//! drives each one from its own tokio task.

use crate::aggregator::FlowAggregator;
use crate::alerts::{Alert, AlertListener, AlertManager};
use crate::classify::{classify_liquidation, classify_trade};
use crate::config::{CoinProfile, EngineConfig};
use crate::detectors::{
    build_profile, detect_cascades, detect_levels, detect_reversion, detect_zones, merge_levels,
    merge_zones, update_levels, update_zones, AbsorptionZone, LiquidationCascade,
    MeanReversionSetup, SupportResistanceLevel, VolumeProfile,
};
use crate::playback::{HistoricalSnapshot, PlaybackService, PlaybackState};
use crate::signal::{CvdPoint, Signal, SignalEngine};
use crate::types::{Coin, FlowData, RawLiquidation, RawTrade, TimeWindow};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Everything one coin tracks. Single-writer: only the owning task mutates.
#[derive(Debug)]
pub struct CoinPipeline {
    profile: CoinProfile,
    config: EngineConfig,
    aggregator: FlowAggregator,
    zones: Vec<AbsorptionZone>,
    cascades: Vec<LiquidationCascade>,
    levels: Vec<SupportResistanceLevel>,
    volume_profile: Option<VolumeProfile>,
    reversion: Option<MeanReversionSetup>,
    signals: SignalEngine,
    alerts: AlertManager,
    playback: PlaybackService,
    /// Trades after this instant are "new" for the stateful detectors.
    last_poll: Option<DateTime<Utc>>,
}

impl CoinPipeline {
    pub fn new(coin: Coin, config: EngineConfig) -> Self {
        let profile = CoinProfile::for_coin(coin);
        Self {
            profile,
            aggregator: FlowAggregator::new(profile, &config),
            zones: Vec::new(),
            cascades: Vec::new(),
            levels: Vec::new(),
            volume_profile: None,
            reversion: None,
            signals: SignalEngine::new(profile, config.signal),
            alerts: AlertManager::new(config.alerts.clone()),
            playback: PlaybackService::new(),
            config,
            last_poll: None,
        }
    }

    pub fn coin(&self) -> Coin {
        self.profile.coin
    }

    pub fn ingest_trade(&mut self, raw: &RawTrade, now: DateTime<Utc>) {
        let trade = classify_trade(raw, &self.profile, now);
        self.aggregator.push_trade(trade);
    }

    pub fn ingest_liquidation(&mut self, raw: &RawLiquidation, now: DateTime<Utc>) {
        let recent = self.aggregator.recent_liquidations();
        let liq = classify_liquidation(raw, &self.profile, &recent, now);
        self.aggregator.push_liquidation(liq);
    }

    /// One detector/signal pass over the current snapshot. Detector panics
    /// are contained per call so one bad pass cannot stall the coin.
    pub fn poll(&mut self, now: DateTime<Utc>) {
        let snapshot = self.aggregator.snapshot();
        let Some(current_price) = snapshot.current_price() else {
            return;
        };
        let new_cutoff = self.last_poll;
        let new_trades: Vec<_> = match new_cutoff {
            Some(cutoff) => snapshot
                .trades
                .iter()
                .filter(|t| t.time >= cutoff)
                .cloned()
                .collect(),
            None => snapshot.trades.clone(),
        };

        let flow = self.aggregator.flow_data(TimeWindow::M15, now);

        // Absorption: refresh lifecycle on carried zones, then merge a fresh
        // detection pass over the node map.
        let mut zones = std::mem::take(&mut self.zones);
        self.zones = self
            .guarded("absorption", || {
                update_zones(&mut zones, &new_trades, current_price, now);
                let fresh =
                    detect_zones(&flow.nodes, self.profile.coin, &self.config.absorption, now);
                merge_zones(zones.clone(), fresh)
            })
            .unwrap_or(zones);
        for zone in &self.zones {
            if zone.strength >= self.config.absorption.min_strength {
                self.alerts.raise_absorption(zone, now);
            }
        }

        let liquidations = self.aggregator.recent_liquidations();
        if let Some(cascades) = self.guarded("cascade", || {
            detect_cascades(&liquidations, self.profile.coin, &self.config.cascade, now)
        }) {
            for cascade in &cascades {
                self.alerts.raise_cascade(cascade, now);
            }
            self.cascades = cascades;
        }

        let mut levels = std::mem::take(&mut self.levels);
        self.levels = self
            .guarded("support_resistance", || {
                update_levels(&mut levels, &new_trades, &self.config.support_resistance);
                let fresh = detect_levels(
                    &snapshot.trades,
                    &flow.nodes,
                    self.profile.coin,
                    current_price,
                    &self.config.support_resistance,
                    now,
                );
                merge_levels(levels.clone(), fresh, &self.config.support_resistance)
            })
            .unwrap_or(levels);
        for level in &self.levels {
            self.alerts.raise_level(level, now);
        }

        self.volume_profile = self
            .guarded("volume_profile", || {
                build_profile(&snapshot.trades, &self.profile, &self.config.volume_profile, now)
            })
            .flatten();

        self.reversion = self
            .guarded("mean_reversion", || {
                detect_reversion(
                    &snapshot.trades,
                    self.profile.coin,
                    current_price,
                    &self.config.mean_reversion,
                    now,
                )
            })
            .flatten();
        if let Some(setup) = &self.reversion {
            self.alerts.raise_reversion(setup, now);
        }

        let cvd: Vec<CvdPoint> = flow
            .series
            .iter()
            .map(|p| CvdPoint {
                time: p.time,
                cvd: p.cvd,
            })
            .collect();
        if let Some(signal) = self.signals.detect(
            &snapshot.trades,
            &liquidations,
            &cvd,
            self.volume_profile.as_ref(),
            current_price,
            now,
        ) {
            info!(coin = %self.profile.coin, direction = signal.direction.label(), "signal");
            self.alerts.raise_signal(&signal, now);
        }

        self.alerts.sweep_expired(now);
        self.last_poll = Some(now);
    }

    fn guarded<T>(&self, stage: &str, f: impl FnOnce() -> T) -> Option<T> {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(coin = %self.profile.coin, stage, "detector pass panicked");
                None
            }
        }
    }

    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.aggregator.prune(now);
    }

    /// Record one playback snapshot: flow data plus the detector, signal,
    /// and alert state as of this instant.
    pub fn record_snapshot(&mut self, now: DateTime<Utc>) {
        let snapshot = self.aggregator.snapshot();
        if snapshot.trades.is_empty() {
            return;
        }
        let flow = self.aggregator.flow_data(TimeWindow::M5, now);
        self.playback.record(HistoricalSnapshot {
            coin: self.profile.coin,
            time: now,
            price: snapshot.current_price().unwrap_or(0.0),
            flow,
            zones: self.zones.clone(),
            cascades: self.cascades.clone(),
            levels: self.levels.clone(),
            volume_profile: self.volume_profile.clone(),
            reversion: self.reversion.clone(),
            signal: self.signals.active_signal().cloned(),
            alerts: self.alerts.alerts().cloned().collect(),
        });
    }

    // Query surface. Playback position, when set, overrides live flow data.

    /// Live flow for the requested window. While a playback cursor is set
    /// this serves the recorded snapshot instead; recorded flow always
    /// carries the five-minute window it was captured with, whatever
    /// `window` asks for.
    pub fn flow_data(&self, window: TimeWindow, now: DateTime<Utc>) -> FlowData {
        match self.playback.current() {
            Some(snapshot) if !self.playback.is_live() => snapshot.flow.clone(),
            _ => self.aggregator.flow_data(window, now),
        }
    }

    pub fn time_series(
        &self,
        window: TimeWindow,
        interval_ms: i64,
        now: DateTime<Utc>,
    ) -> Vec<crate::types::FlowTimePoint> {
        self.aggregator.time_series(window, interval_ms, now)
    }

    pub fn zones(&self) -> &[AbsorptionZone] {
        &self.zones
    }

    pub fn cascades(&self) -> &[LiquidationCascade] {
        &self.cascades
    }

    pub fn levels(&self) -> &[SupportResistanceLevel] {
        &self.levels
    }

    pub fn volume_profile(&self) -> Option<&VolumeProfile> {
        self.volume_profile.as_ref()
    }

    pub fn reversion(&self) -> Option<&MeanReversionSetup> {
        self.reversion.as_ref()
    }

    pub fn active_signal(&self) -> Option<&Signal> {
        self.signals.active_signal()
    }

    pub fn dismiss_signal(&mut self) -> Option<Signal> {
        self.signals.dismiss()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.alerts().cloned().collect()
    }

    pub fn acknowledge_alert(&mut self, id: u64) -> bool {
        self.alerts.acknowledge(id)
    }

    pub fn acknowledge_all_alerts(&mut self) {
        self.alerts.acknowledge_all(self.profile.coin)
    }

    pub fn subscribe_alerts(&mut self, listener: Box<dyn AlertListener>) {
        self.alerts.subscribe(listener)
    }

    pub fn playback(&self) -> &PlaybackService {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut PlaybackService {
        &mut self.playback
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state()
    }
}

/// Engine facade: per-coin pipelines behind `RwLock`s, plus the driver loop.
#[derive(Debug, Clone)]
pub struct MarketEngine {
    config: EngineConfig,
    pipelines: Arc<HashMap<Coin, RwLock<CoinPipeline>>>,
}

impl MarketEngine {
    pub fn new(config: EngineConfig) -> Self {
        let pipelines = Coin::all()
            .into_iter()
            .map(|coin| (coin, RwLock::new(CoinPipeline::new(coin, config.clone()))))
            .collect();
        Self {
            config,
            pipelines: Arc::new(pipelines),
        }
    }

    pub fn pipeline(&self, coin: Coin) -> Option<&RwLock<CoinPipeline>> {
        self.pipelines.get(&coin)
    }

    /// Route a raw trade by its wire symbol. Unknown symbols are dropped.
    pub async fn on_trade(&self, raw: RawTrade, now: DateTime<Utc>) {
        let Some(coin) = Coin::parse(&raw.coin) else {
            debug!(symbol = %raw.coin, "unknown trade symbol");
            return;
        };
        if let Some(pipeline) = self.pipelines.get(&coin) {
            pipeline.write().await.ingest_trade(&raw, now);
        }
    }

    pub async fn on_liquidation(&self, raw: RawLiquidation, now: DateTime<Utc>) {
        let Some(coin) = Coin::parse(&raw.coin) else {
            debug!(symbol = %raw.coin, "unknown liquidation symbol");
            return;
        };
        if let Some(pipeline) = self.pipelines.get(&coin) {
            pipeline.write().await.ingest_liquidation(&raw, now);
        }
    }

    /// Spawn one driver task per coin. Each task owns its coin's poll,
    /// prune, snapshot, and playback-tick cadence.
    pub fn spawn(&self) -> Vec<tokio::task::JoinHandle<()>> {
        Coin::all()
            .into_iter()
            .map(|coin| {
                let engine = self.clone();
                let poll = Duration::from_secs(self.config.poll_secs);
                let prune = Duration::from_secs(self.config.prune_secs);
                let snapshot = Duration::from_secs(self.config.snapshot_secs);
                tokio::spawn(async move {
                    engine.drive_coin(coin, poll, prune, snapshot).await;
                })
            })
            .collect()
    }

    async fn drive_coin(
        &self,
        coin: Coin,
        poll: Duration,
        prune: Duration,
        snapshot: Duration,
    ) {
        let Some(pipeline) = self.pipelines.get(&coin) else {
            return;
        };
        info!(%coin, "pipeline driver started");
        let mut poll_timer = tokio::time::interval(poll);
        let mut prune_timer = tokio::time::interval(prune);
        let mut snapshot_timer = tokio::time::interval(snapshot);
        let mut playback_timer = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                _ = poll_timer.tick() => {
                    pipeline.write().await.poll(Utc::now());
                }
                _ = prune_timer.tick() => {
                    pipeline.write().await.prune(Utc::now());
                }
                _ = snapshot_timer.tick() => {
                    pipeline.write().await.record_snapshot(Utc::now());
                }
                _ = playback_timer.tick() => {
                    pipeline.write().await.playback_mut().tick();
                }
            }
        }
    }

    pub async fn flow_data(&self, coin: Coin, window: TimeWindow) -> Option<FlowData> {
        let pipeline = self.pipelines.get(&coin)?;
        Some(pipeline.read().await.flow_data(window, Utc::now()))
    }

    pub async fn active_signal(&self, coin: Coin) -> Option<Signal> {
        let pipeline = self.pipelines.get(&coin)?;
        pipeline.read().await.active_signal().cloned()
    }

    pub async fn dismiss_signal(&self, coin: Coin) -> Option<Signal> {
        let pipeline = self.pipelines.get(&coin)?;
        pipeline.write().await.dismiss_signal()
    }

    pub async fn time_series(
        &self,
        coin: Coin,
        window: TimeWindow,
        interval_ms: i64,
    ) -> Vec<crate::types::FlowTimePoint> {
        match self.pipelines.get(&coin) {
            Some(pipeline) => pipeline.read().await.time_series(window, interval_ms, Utc::now()),
            None => Vec::new(),
        }
    }

    pub async fn alerts(&self, coin: Coin) -> Vec<Alert> {
        match self.pipelines.get(&coin) {
            Some(pipeline) => pipeline.read().await.alerts(),
            None => Vec::new(),
        }
    }

    /// Apply a playback control to one coin's cursor.
    pub async fn playback_control(&self, coin: Coin, f: impl FnOnce(&mut PlaybackService)) {
        if let Some(pipeline) = self.pipelines.get(&coin) {
            f(pipeline.write().await.playback_mut());
        }
    }

    pub async fn playback_state(&self, coin: Coin) -> Option<PlaybackState> {
        let pipeline = self.pipelines.get(&coin)?;
        Some(pipeline.read().await.playback_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_trade(price: f64, size: f64, side: &str, time: DateTime<Utc>, id: u64) -> RawTrade {
        RawTrade {
            coin: "BTC".to_string(),
            side: side.to_string(),
            price: price.to_string(),
            size: size.to_string(),
            time: time.timestamp_millis(),
            id: id.to_string(),
        }
    }

    #[test]
    fn test_pipeline_isolated_per_coin() {
        let now = Utc::now();
        let mut btc = CoinPipeline::new(Coin::Btc, EngineConfig::default());
        let eth = CoinPipeline::new(Coin::Eth, EngineConfig::default());

        btc.ingest_trade(&raw_trade(50_000.0, 1.0, "B", now, 1), now);
        btc.poll(now);

        let btc_flow = btc.flow_data(TimeWindow::M5, now);
        let eth_flow = eth.flow_data(TimeWindow::M5, now);
        assert_eq!(btc_flow.metrics.trade_count, 1);
        assert_eq!(eth_flow.metrics.trade_count, 0);
    }

    #[test]
    fn test_poll_without_trades_is_noop() {
        let mut pipeline = CoinPipeline::new(Coin::Btc, EngineConfig::default());
        pipeline.poll(Utc::now());
        assert!(pipeline.zones().is_empty());
        assert!(pipeline.volume_profile().is_none());
    }

    #[test]
    fn test_snapshot_then_playback_overrides_flow() {
        let now = Utc::now();
        let mut pipeline = CoinPipeline::new(Coin::Btc, EngineConfig::default());
        pipeline.ingest_trade(&raw_trade(50_000.0, 1.0, "B", now, 1), now);
        pipeline.record_snapshot(now);

        pipeline.playback_mut().play();
        assert!(!pipeline.playback().is_live());
        let flow = pipeline.flow_data(TimeWindow::M5, now);
        // Served from the recorded snapshot, not the live aggregator.
        assert_eq!(flow.generated_at, now);
    }

    #[tokio::test]
    async fn test_engine_routes_by_symbol() {
        let engine = MarketEngine::new(EngineConfig::default());
        let now = Utc::now();
        engine.on_trade(raw_trade(50_000.0, 1.0, "B", now, 1), now).await;

        let mut unknown = raw_trade(1.0, 1.0, "B", now, 2);
        unknown.coin = "DOGE".to_string();
        engine.on_trade(unknown, now).await;

        let btc = engine.flow_data(Coin::Btc, TimeWindow::M5).await.unwrap();
        assert_eq!(btc.metrics.trade_count, 1);
        let eth = engine.flow_data(Coin::Eth, TimeWindow::M5).await.unwrap();
        assert_eq!(eth.metrics.trade_count, 0);
    }
}
