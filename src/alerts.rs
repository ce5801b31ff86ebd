//! Alert generation, filtering, and delivery.
//!
//! Detector and signal events become alerts ranked by severity. The manager
//! filters by severity floor and enabled kinds, collapses duplicates, sweeps
//! expired alerts, and fans out to registered listeners. A panicking
//! listener is isolated so it cannot take the pipeline down.

use crate::config::AlertConfig;
use crate::detectors::{
    AbsorptionZone, LevelKind, LiquidationCascade, MeanReversionSetup, SupportResistanceLevel,
};
use crate::signal::Signal;
use crate::types::{CascadeRisk, Coin};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum AlertKind {
    Absorption,
    Cascade,
    Level,
    MeanReversion,
    Signal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Alert {
    pub id: u64,
    pub coin: Coin,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub price: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
}

pub trait AlertListener: Send + Sync {
    fn on_alert(&self, alert: &Alert);
}

impl<F> AlertListener for F
where
    F: Fn(&Alert) + Send + Sync,
{
    fn on_alert(&self, alert: &Alert) {
        self(alert)
    }
}

pub struct AlertManager {
    cfg: AlertConfig,
    next_id: u64,
    alerts: VecDeque<Alert>,
    listeners: Vec<Box<dyn AlertListener>>,
}

impl std::fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertManager")
            .field("alerts", &self.alerts.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl AlertManager {
    pub fn new(cfg: AlertConfig) -> Self {
        Self {
            cfg,
            next_id: 0,
            alerts: VecDeque::new(),
            listeners: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, listener: Box<dyn AlertListener>) {
        self.listeners.push(listener);
    }

    /// All retained alerts, newest first.
    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().rev()
    }

    pub fn unacknowledged(&self) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().rev().filter(|a| !a.acknowledged)
    }

    pub fn acknowledge(&mut self, id: u64) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                true
            }
            None => false,
        }
    }

    pub fn acknowledge_all(&mut self, coin: Coin) {
        for alert in self.alerts.iter_mut().filter(|a| a.coin == coin) {
            alert.acknowledged = true;
        }
    }

    /// Auto-acknowledge alerts older than the TTL.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) {
        let Some(ttl) = self.cfg.ttl_secs else {
            return;
        };
        let cutoff = now - ChronoDuration::seconds(ttl);
        for alert in self.alerts.iter_mut() {
            if !alert.acknowledged && alert.created_at < cutoff {
                alert.acknowledged = true;
            }
        }
    }

    pub fn raise_absorption(&mut self, zone: &AbsorptionZone, now: DateTime<Utc>) {
        let severity = if zone.whale_activity && zone.strength >= 80.0 {
            AlertSeverity::Critical
        } else if zone.strength >= 70.0 {
            AlertSeverity::High
        } else if zone.strength >= 55.0 {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        };
        let message = format!(
            "{} absorption at {:.2} ({} strength {:.0}, {} USD)",
            zone.side,
            zone.center_price,
            zone.coin,
            zone.strength,
            zone.total_volume as i64,
        );
        self.raise(zone.coin, AlertKind::Absorption, severity, zone.center_price, message, now);
    }

    pub fn raise_cascade(&mut self, cascade: &LiquidationCascade, now: DateTime<Utc>) {
        let severity = match cascade.risk {
            CascadeRisk::High => AlertSeverity::Critical,
            CascadeRisk::Medium => AlertSeverity::High,
            CascadeRisk::Low => AlertSeverity::Warning,
        };
        let message = format!(
            "{} cascade risk near {:.2}: {} liquidations, {} USD",
            cascade.coin,
            cascade.cluster_price,
            cascade.liquidation_count,
            cascade.total_volume as i64,
        );
        self.raise(cascade.coin, AlertKind::Cascade, severity, cascade.cluster_price, message, now);
    }

    pub fn raise_level(&mut self, level: &SupportResistanceLevel, now: DateTime<Utc>) {
        let severity = if level.is_breached || level.strength >= 80.0 {
            AlertSeverity::High
        } else if level.strength >= 60.0 {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        };
        let label = match level.kind {
            LevelKind::Support => "support",
            LevelKind::Resistance => "resistance",
        };
        let state = if level.is_breached { "broken" } else { "holding" };
        let message = format!(
            "{} {} {} at {:.2} ({} touches, strength {:.0})",
            level.coin, state, label, level.price, level.touch_count, level.strength,
        );
        self.raise(level.coin, AlertKind::Level, severity, level.price, message, now);
    }

    pub fn raise_reversion(&mut self, setup: &MeanReversionSetup, now: DateTime<Utc>) {
        let severity = if setup.probability >= 0.85 {
            AlertSeverity::High
        } else {
            AlertSeverity::Warning
        };
        let message = format!(
            "{} {:?} at {:.2} (z {:+.2}, p {:.2})",
            setup.coin, setup.condition, setup.current_price, setup.z_score, setup.probability,
        );
        self.raise(setup.coin, AlertKind::MeanReversion, severity, setup.current_price, message, now);
    }

    pub fn raise_signal(&mut self, signal: &Signal, now: DateTime<Utc>) {
        let message = format!(
            "{} {} entry {:.2} target {:.2} stop {:.2}",
            signal.coin,
            signal.direction.label(),
            signal.entry,
            signal.target,
            signal.stop,
        );
        // Emitted signals always clear the full confirmation gate.
        self.raise(signal.coin, AlertKind::Signal, AlertSeverity::Critical, signal.entry, message, now);
    }

    fn raise(
        &mut self,
        coin: Coin,
        kind: AlertKind,
        severity: AlertSeverity,
        price: f64,
        message: String,
        now: DateTime<Utc>,
    ) {
        if severity < self.cfg.min_severity {
            return;
        }
        if !self.cfg.enabled_kinds.is_empty() && !self.cfg.enabled_kinds.contains(&kind) {
            return;
        }
        if self.is_duplicate(coin, kind, price, now) {
            return;
        }

        self.next_id += 1;
        let alert = Alert {
            id: self.next_id,
            coin,
            kind,
            severity,
            price,
            message,
            created_at: now,
            acknowledged: false,
        };

        self.alerts.push_back(alert.clone());
        while self.alerts.len() > self.cfg.max_alerts {
            self.alerts.pop_front();
        }
        self.notify(&alert);
    }

    /// Same coin, kind, and rounded price inside the dedup window.
    fn is_duplicate(&self, coin: Coin, kind: AlertKind, price: f64, now: DateTime<Utc>) -> bool {
        let cutoff = now - ChronoDuration::seconds(self.cfg.dedup_secs);
        let key = dedup_price(price);
        self.alerts
            .iter()
            .rev()
            .take_while(|a| a.created_at >= cutoff)
            .any(|a| a.coin == coin && a.kind == kind && dedup_price(a.price) == key)
    }

    fn notify(&self, alert: &Alert) {
        for listener in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_alert(alert))).is_err() {
                warn!(coin = %alert.coin, kind = ?alert.kind, "alert listener panicked");
            }
        }
    }
}

/// Log-scale bucket with 0.1% width so near-identical prices collapse
/// together regardless of magnitude.
fn dedup_price(price: f64) -> i64 {
    if price <= 0.0 {
        return 0;
    }
    (price.ln() / 0.001).round() as i64
}
