//! Snapshot recording and VCR-style playback.
//!
//! The engine records periodic market snapshots into a bounded ring. A
//! playback cursor moves over recorded time: play advances it on every tick,
//! seek and step reposition it, and all movement clamps to the recorded
//! range. Playback never mutates live state.

use crate::alerts::Alert;
use crate::detectors::{
    AbsorptionZone, LiquidationCascade, MeanReversionSetup, SupportResistanceLevel, VolumeProfile,
};
use crate::signal::Signal;
use crate::types::{Coin, FlowData};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Ring cap on retained snapshots per coin.
pub const MAX_SNAPSHOTS: usize = 1_000;

/// Wall-clock milliseconds one playback tick represents at speed 1.
pub const TICK_MS: i64 = 100;

/// One recorded frame: flow data plus the detector, signal, and alert state
/// that held at capture time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoricalSnapshot {
    pub coin: Coin,
    pub time: DateTime<Utc>,
    pub price: f64,
    pub flow: FlowData,
    pub zones: Vec<AbsorptionZone>,
    pub cascades: Vec<LiquidationCascade>,
    pub levels: Vec<SupportResistanceLevel>,
    pub volume_profile: Option<VolumeProfile>,
    pub reversion: Option<MeanReversionSetup>,
    pub signal: Option<Signal>,
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum PlaybackMode {
    Live,
    Paused,
    Playing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum PlaybackDirection {
    Forward,
    Backward,
}

/// Cursor state reported to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct PlaybackState {
    pub mode: PlaybackMode,
    pub direction: PlaybackDirection,
    pub speed: f64,
    pub position: Option<DateTime<Utc>>,
    pub recorded: usize,
}

#[derive(Debug)]
pub struct PlaybackService {
    snapshots: VecDeque<HistoricalSnapshot>,
    mode: PlaybackMode,
    direction: PlaybackDirection,
    speed: f64,
    position: Option<DateTime<Utc>>,
}

impl Default for PlaybackService {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackService {
    pub fn new() -> Self {
        Self {
            snapshots: VecDeque::new(),
            mode: PlaybackMode::Live,
            direction: PlaybackDirection::Forward,
            speed: 1.0,
            position: None,
        }
    }

    /// Record a snapshot, keeping the ring time-ordered and bounded.
    pub fn record(&mut self, snapshot: HistoricalSnapshot) {
        match self.snapshots.back() {
            Some(last) if snapshot.time < last.time => {
                // Late arrival: insert at its ordered slot.
                let idx = self
                    .snapshots
                    .partition_point(|s| s.time <= snapshot.time);
                self.snapshots.insert(idx, snapshot);
            }
            _ => self.snapshots.push_back(snapshot),
        }
        while self.snapshots.len() > MAX_SNAPSHOTS {
            self.snapshots.pop_front();
        }
    }

    pub fn state(&self) -> PlaybackState {
        PlaybackState {
            mode: self.mode,
            direction: self.direction,
            speed: self.speed,
            position: self.position,
            recorded: self.snapshots.len(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.mode == PlaybackMode::Live
    }

    /// Snapshot at or before the cursor. `None` while live or empty.
    pub fn current(&self) -> Option<&HistoricalSnapshot> {
        let position = self.position?;
        let idx = self.snapshots.partition_point(|s| s.time <= position);
        if idx == 0 {
            self.snapshots.front()
        } else {
            self.snapshots.get(idx - 1)
        }
    }

    /// Enter playback at the oldest snapshot. No-op when nothing is recorded.
    pub fn play(&mut self) {
        if self.snapshots.is_empty() {
            return;
        }
        if self.position.is_none() {
            self.position = self.snapshots.front().map(|s| s.time);
        }
        self.mode = PlaybackMode::Playing;
    }

    pub fn pause(&mut self) {
        if self.mode == PlaybackMode::Playing {
            self.mode = PlaybackMode::Paused;
        }
    }

    /// Pause and rewind the cursor to the oldest snapshot.
    pub fn stop(&mut self) {
        if self.mode == PlaybackMode::Live {
            return;
        }
        self.mode = PlaybackMode::Paused;
        self.position = self.snapshots.front().map(|s| s.time);
    }

    pub fn set_direction(&mut self, direction: PlaybackDirection) {
        self.direction = direction;
    }

    /// Leave playback and drop the cursor.
    pub fn go_live(&mut self) {
        self.mode = PlaybackMode::Live;
        self.position = None;
    }

    /// Speed multiplier, clamped to a sane range.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.clamp(0.25, 16.0);
    }

    /// Advance the cursor by one tick of recorded time in the configured
    /// direction. Auto-pauses when the cursor reaches the range bound.
    pub fn tick(&mut self) {
        if self.mode != PlaybackMode::Playing {
            return;
        }
        let (Some(position), Some(first), Some(last)) = (
            self.position,
            self.snapshots.front().map(|s| s.time),
            self.snapshots.back().map(|s| s.time),
        ) else {
            return;
        };
        let step = ChronoDuration::milliseconds((TICK_MS as f64 * self.speed) as i64);
        match self.direction {
            PlaybackDirection::Forward => {
                let next = position + step;
                if next >= last {
                    self.position = Some(last);
                    self.mode = PlaybackMode::Paused;
                } else {
                    self.position = Some(next);
                }
            }
            PlaybackDirection::Backward => {
                let next = position - step;
                if next <= first {
                    self.position = Some(first);
                    self.mode = PlaybackMode::Paused;
                } else {
                    self.position = Some(next);
                }
            }
        }
    }

    /// Move the cursor to the recorded snapshot nearest the requested time
    /// by absolute difference. Out-of-range times clamp to the bounds.
    pub fn seek_to(&mut self, time: DateTime<Utc>) {
        let (Some(first), Some(last)) = (
            self.snapshots.front().map(|s| s.time),
            self.snapshots.back().map(|s| s.time),
        ) else {
            return;
        };
        let clamped = time.clamp(first, last);
        let idx = self.snapshots.partition_point(|s| s.time <= clamped);
        let before = idx.checked_sub(1).and_then(|i| self.snapshots.get(i));
        let after = self.snapshots.get(idx);
        let nearest = match (before, after) {
            (Some(b), Some(a)) => {
                if clamped - b.time <= a.time - clamped {
                    b.time
                } else {
                    a.time
                }
            }
            (Some(b), None) => b.time,
            (None, Some(a)) => a.time,
            (None, None) => return,
        };
        self.position = Some(nearest);
        if self.mode == PlaybackMode::Live {
            self.mode = PlaybackMode::Paused;
        }
    }

    /// Jump to the next recorded snapshot. No-op at the newest.
    pub fn step_forward(&mut self) {
        let Some(position) = self.position else {
            return;
        };
        let idx = self.snapshots.partition_point(|s| s.time <= position);
        if let Some(next) = self.snapshots.get(idx) {
            self.position = Some(next.time);
            self.pause();
        }
    }

    /// Jump to the previous recorded snapshot. No-op at the oldest.
    pub fn step_backward(&mut self) {
        let Some(position) = self.position else {
            return;
        };
        let idx = self.snapshots.partition_point(|s| s.time < position);
        if idx >= 1 {
            if let Some(prev) = self.snapshots.get(idx - 1) {
                self.position = Some(prev.time);
                self.pause();
            }
        }
    }
}
