//! End-to-end pipeline tests: raw wire records in, detector state, signals,
//! alerts, and playback out.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hyperflow::alerts::AlertKind;
use hyperflow::config::EngineConfig;
use hyperflow::detectors::LevelKind;
use hyperflow::engine::{CoinPipeline, MarketEngine};
use hyperflow::playback::PlaybackMode;
use hyperflow::signal::SignalDirection;
use hyperflow::types::{Coin, RawTrade, TimeWindow};

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

/// A tape engineered to clear every signal gate for a LONG at 50_000:
/// early CVD oscillation across zero, then three minutes of 80%+ buy share,
/// a cluster of three large buys, and no liquidations anywhere.
fn qualifying_tape(now: DateTime<Utc>) -> Vec<RawTrade> {
    let mut tape = Vec::new();
    let mut id = 0u64;
    let mut push = |price: f64, size: f64, side: &str, time: DateTime<Utc>, tape: &mut Vec<RawTrade>| {
        id += 1;
        tape.push(raw_trade(price, size, side, time, id));
    };

    // CVD oscillation: sell, buy, sell, buy buckets crossing zero twice.
    let minute = |m: i64| now - ChronoDuration::minutes(m);
    for i in 0..5 {
        let t = minute(14) + ChronoDuration::seconds(i);
        push(50_000.0, 0.4, "A", t, &mut tape); // 5 x 20k sell
    }
    for i in 0..5 {
        let t = minute(13) + ChronoDuration::seconds(i);
        push(50_000.0, 1.0, "B", t, &mut tape); // 5 x 50k buy
    }
    for i in 0..5 {
        let t = minute(12) + ChronoDuration::seconds(i);
        push(50_000.0, 1.2, "A", t, &mut tape); // 5 x 60k sell
    }
    for i in 0..5 {
        let t = minute(11) + ChronoDuration::seconds(i);
        push(50_000.0, 0.8, "B", t, &mut tape); // 5 x 40k buy
    }

    // Mildly buy-side filler to keep the tape populated.
    for m in 4..=10 {
        for i in 0..4 {
            let t = minute(m) + ChronoDuration::seconds(i * 10);
            let side = if i == 3 { "A" } else { "B" };
            push(50_000.0, 0.4, side, t, &mut tape);
        }
    }

    // Three consecutive one-minute windows at 80% buy share.
    for w in 0..3i64 {
        let base = now - ChronoDuration::seconds(60 * w + 30);
        for i in 0..20 {
            let side = if i % 5 == 4 { "A" } else { "B" };
            let t = base + ChronoDuration::milliseconds(i * 100);
            push(50_000.0, 0.4, side, t, &mut tape);
        }
    }

    // Large-order cluster: three 250k buys, zero opposing.
    for i in 0..3i64 {
        let t = now - ChronoDuration::seconds(20 - i);
        push(50_000.0, 5.0, "B", t, &mut tape);
    }

    tape.sort_by_key(|t| t.time);
    tape
}

fn pipeline_with(tape: Vec<RawTrade>, now: DateTime<Utc>) -> CoinPipeline {
    let mut pipeline = CoinPipeline::new(Coin::Btc, EngineConfig::default());
    for raw in &tape {
        pipeline.ingest_trade(raw, now);
    }
    pipeline
}

#[test]
fn test_qualifying_tape_emits_single_long() {
    let now = Utc::now();
    let mut pipeline = pipeline_with(qualifying_tape(now), now);
    pipeline.poll(now);

    let signal = pipeline.active_signal().expect("signal expected");
    assert_eq!(signal.direction, SignalDirection::Long);
    assert!(signal.confidence > 0.95);
    assert!(signal.confirmations.iter().all(|c| c.met));
    assert!((signal.entry - 50_000.0).abs() < 1.0);
    assert!(signal.target > signal.entry);
    assert!(signal.stop < signal.entry);

    // The emission also landed in the alert stream.
    assert!(pipeline
        .alerts()
        .iter()
        .any(|a| a.kind == AlertKind::Signal));

    // A second poll with the signal outstanding emits nothing new.
    let id = signal.id;
    pipeline.poll(now + ChronoDuration::seconds(5));
    assert_eq!(pipeline.active_signal().map(|s| s.id), Some(id));
}

#[test]
fn test_single_opposing_large_order_blocks_signal() {
    let now = Utc::now();
    let mut tape = qualifying_tape(now);
    // One large sell inside the lookback breaks the clustering confirmation.
    tape.push(raw_trade(50_000.0, 5.0, "A", now - ChronoDuration::seconds(15), 9_999));
    tape.sort_by_key(|t| t.time);

    let mut pipeline = pipeline_with(tape, now);
    pipeline.poll(now);
    assert!(pipeline.active_signal().is_none());
}

#[test]
fn test_dismiss_then_redetect() {
    let now = Utc::now();
    let mut pipeline = pipeline_with(qualifying_tape(now), now);
    pipeline.poll(now);
    assert!(pipeline.active_signal().is_some());

    let dismissed = pipeline.dismiss_signal().expect("dismissed");
    assert!(pipeline.active_signal().is_none());

    // Conditions still qualify on the next poll, so a fresh LONG appears.
    let later = now + ChronoDuration::seconds(30);
    for raw in qualifying_tape(later) {
        let mut raw = raw;
        raw.id = format!("second-{}", raw.id);
        pipeline.ingest_trade(&raw, later);
    }
    pipeline.poll(later);
    let second = pipeline.active_signal().expect("second signal");
    assert!(second.id > dismissed.id);
}

#[test]
fn test_support_resistance_lifecycle() {
    let now = Utc::now();
    let mut pipeline = CoinPipeline::new(Coin::Btc, EngineConfig::default());

    // Repeating 100, 101, 99, 102, 98 prints four touch clusters, closed by
    // one trade back at 100 so the last extreme registers.
    let start = now - ChronoDuration::minutes(10);
    let mut t = start;
    let mut id = 0u64;
    for _ in 0..4 {
        for price in [100.0, 101.0, 99.0, 102.0, 98.0] {
            id += 1;
            pipeline.ingest_trade(&raw_trade(price, 50.0, "B", t, id), now);
            t += ChronoDuration::seconds(5);
        }
    }
    pipeline.ingest_trade(&raw_trade(100.0, 50.0, "B", t, id + 1), now);
    pipeline.poll(now);

    let levels = pipeline.levels();
    assert!(levels
        .iter()
        .any(|l| l.kind == LevelKind::Support && (l.price - 98.0).abs() < 0.5));
    assert!(levels
        .iter()
        .any(|l| l.kind == LevelKind::Resistance && (l.price - 101.0).abs() < 0.5));
    assert!(levels.iter().all(|l| !l.is_breached));

    // A print 0.5% below 98 latches the support breach; the recovery print
    // afterwards keeps the level kinds stable and does not clear the latch.
    let later = now + ChronoDuration::seconds(10);
    pipeline.ingest_trade(&raw_trade(97.0, 50.0, "A", later, id + 2), later);
    pipeline.ingest_trade(
        &raw_trade(100.0, 50.0, "B", later + ChronoDuration::seconds(1), id + 3),
        later,
    );
    pipeline.poll(later + ChronoDuration::seconds(2));

    let support = pipeline
        .levels()
        .iter()
        .find(|l| l.kind == LevelKind::Support && (l.price - 98.0).abs() < 0.5)
        .expect("support survives the merge");
    assert!(support.is_breached);

    let resistance = pipeline
        .levels()
        .iter()
        .find(|l| l.kind == LevelKind::Resistance && (l.price - 102.0).abs() < 0.5)
        .expect("resistance survives the merge");
    assert!(!resistance.is_breached);

    // Detected levels show up in the alert stream.
    assert!(pipeline.alerts().iter().any(|a| a.kind == AlertKind::Level));

    // A snapshot taken now carries the level and alert state, so playback
    // can reconstruct what the market looked like at this instant.
    let capture_at = later + ChronoDuration::seconds(3);
    pipeline.record_snapshot(capture_at);
    pipeline.playback_mut().play();
    let frame = pipeline.playback().current().expect("recorded frame");
    assert!(frame
        .levels
        .iter()
        .any(|l| l.kind == LevelKind::Support && l.is_breached));
    assert!(frame.alerts.iter().any(|a| a.kind == AlertKind::Level));
}

#[test]
fn test_playback_over_recorded_snapshots() {
    let now = Utc::now();
    let mut pipeline = CoinPipeline::new(Coin::Btc, EngineConfig::default());

    for i in 0..3i64 {
        let t = now - ChronoDuration::seconds(90 - i * 30);
        pipeline.ingest_trade(&raw_trade(50_000.0 + i as f64, 1.0, "B", t, i as u64), t);
        pipeline.record_snapshot(t);
    }
    let first = now - ChronoDuration::seconds(90);
    let last = now - ChronoDuration::seconds(30);

    // Seeking outside the recorded range clamps to its edges.
    pipeline.playback_mut().seek_to(now + ChronoDuration::hours(1));
    assert_eq!(pipeline.playback_state().position, Some(last));
    pipeline.playback_mut().seek_to(now - ChronoDuration::hours(1));
    assert_eq!(pipeline.playback_state().position, Some(first));

    // Stepping past the oldest snapshot is a no-op.
    pipeline.playback_mut().step_backward();
    assert_eq!(pipeline.playback_state().position, Some(first));

    // While a cursor is set, queries serve the recorded snapshot.
    let flow = pipeline.flow_data(TimeWindow::M5, now);
    assert_eq!(flow.generated_at, first);

    // Returning to live serves the aggregator again.
    pipeline.playback_mut().go_live();
    assert_eq!(pipeline.playback_state().mode, PlaybackMode::Live);
    let flow = pipeline.flow_data(TimeWindow::M5, now);
    assert_eq!(flow.generated_at, now);
}

#[tokio::test]
async fn test_market_engine_end_to_end() {
    let engine = MarketEngine::new(EngineConfig::default());
    let now = Utc::now();

    for raw in qualifying_tape(now) {
        engine.on_trade(raw, now).await;
    }
    if let Some(pipeline) = engine.pipeline(Coin::Btc) {
        pipeline.write().await.poll(now);
    }

    let signal = engine.active_signal(Coin::Btc).await.expect("signal");
    assert_eq!(signal.coin, Coin::Btc);
    assert_eq!(signal.direction, SignalDirection::Long);

    let alerts = engine.alerts(Coin::Btc).await;
    assert!(alerts.iter().any(|a| a.kind == AlertKind::Signal));

    // Other coins saw nothing.
    assert!(engine.active_signal(Coin::Eth).await.is_none());
    let eth_flow = engine.flow_data(Coin::Eth, TimeWindow::M5).await.expect("flow");
    assert_eq!(eth_flow.metrics.trade_count, 0);
}
