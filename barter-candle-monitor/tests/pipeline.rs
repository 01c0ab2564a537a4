use async_trait::async_trait;
use barter_candle_monitor::{
    Alert, AlertMonitor, AlertSink, CandleStore, Classification, FeedError, HistoricalBar,
    HistoricalBars, Rsi, SnapshotMerger, Thresholds, Tick, Timeframe, feed::run_ingestion,
};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

struct FixedBars(Vec<HistoricalBar>);

#[async_trait]
impl HistoricalBars for FixedBars {
    async fn fetch_recent(&self) -> Result<Vec<HistoricalBar>, FeedError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl AlertSink for RecordingSink {
    fn dispatch(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
}

/// 30 rising 1m bars from 09:00, newest first like the REST API.
fn snapshot_bars() -> Vec<HistoricalBar> {
    (0..30)
        .rev()
        .map(|i| {
            let close = 100.0 + i as f64;
            HistoricalBar {
                timestamp: (at(9, 0, 0) + TimeDelta::minutes(i)).timestamp(),
                open: close - 0.5,
                high: close + 0.5,
                low: close - 1.0,
                close,
                volume: 5.0,
            }
        })
        .collect()
}

#[tokio::test]
async fn test_snapshot_live_resample_and_alert() {
    let store = CandleStore::new(360, [Timeframe::FIVE_MINUTES, Timeframe::FIFTEEN_MINUTES]);

    // Historical snapshot
    let merger = SnapshotMerger::new(store.clone(), FixedBars(snapshot_bars()));
    let report = merger.run_cycle().await.unwrap();
    assert_eq!(report.applied, 30);
    assert_eq!(store.len(), 30);
    assert_eq!(store.read_derived(Timeframe::FIVE_MINUTES).unwrap().len(), 6);
    assert_eq!(store.read_derived(Timeframe::FIFTEEN_MINUTES).unwrap().len(), 2);

    // Live trades overwrite the 09:29 snapshot candle once 09:30 trades arrive
    let (tick_tx, tick_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingestion = tokio::spawn(run_ingestion(tick_rx, store.clone(), None, shutdown_rx));

    for (time, price) in [
        (at(9, 29, 5), 129.0),
        (at(9, 29, 30), 200.0),
        (at(9, 30, 1), 201.0),
    ] {
        tick_tx.send(Tick::new(time, price)).await.unwrap();
    }
    drop(tick_tx);
    ingestion.await.unwrap();

    let live = store.base_at(&at(9, 29, 0)).unwrap();
    assert_eq!(live.open, 129.0);
    assert_eq!(live.close, 200.0);
    assert_eq!(live.volume, 2.0);
    assert_eq!(store.len(), 30);

    // Derived series reflect the live correction
    let five = store.read_derived(Timeframe::FIVE_MINUTES).unwrap();
    let last = five.last().unwrap();
    assert_eq!(last.timestamp, at(9, 30, 0));
    assert_eq!(last.open, 124.5);
    assert_eq!(last.high, 200.0);
    assert_eq!(last.close, 200.0);
    assert_eq!(last.volume, 4.0 * 5.0 + 2.0);

    // Monitor: 1m has enough strictly rising closes, 5m and 15m do not
    let sink = Arc::new(RecordingSink::default());
    let monitor = AlertMonitor::new(
        store.clone(),
        store.timeframes(),
        Rsi::default(),
        Thresholds::default(),
        Arc::clone(&sink),
    );

    let readings = monitor.run_cycle();
    let classifications: Vec<_> = readings.iter().map(|r| r.classification).collect();
    assert_eq!(
        classifications,
        vec![
            Classification::Overbought,
            Classification::Waiting,
            Classification::Waiting
        ]
    );
    assert_eq!(readings[0].value, Some(100.0));

    let alerts = sink.alerts.lock();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].timeframe, Timeframe::ONE_MINUTE);
}

#[tokio::test]
async fn test_retention_bounds_merged_history() {
    let store = CandleStore::new(10, [Timeframe::FIVE_MINUTES]);

    let merger = SnapshotMerger::new(store.clone(), FixedBars(snapshot_bars()));
    merger.run_cycle().await.unwrap();

    let base = store.read_base();
    assert_eq!(base.len(), 10);
    assert_eq!(base.first().map(|c| c.timestamp), Some(at(9, 20, 0)));
    assert_eq!(base.last().map(|c| c.timestamp), Some(at(9, 29, 0)));
    assert!(base.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));

    // Derived series only cover what the base still holds
    let five = store.read_derived(Timeframe::FIVE_MINUTES).unwrap();
    let labels: Vec<_> = five.iter().map(|c| c.timestamp).collect();
    assert_eq!(labels, vec![at(9, 25, 0), at(9, 30, 0)]);
}
