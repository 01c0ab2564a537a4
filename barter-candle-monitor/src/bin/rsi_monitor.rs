//! RSI Monitor
//!
//! Streams trades for one product, keeps a reconciled 1m candle store with 5m/15m resamples,
//! and alerts when RSI leaves the configured band on any timeframe.
//!
//! Configuration is read from `RSI_*` environment variables; logging honours `RUST_LOG`.

use barter_candle_monitor::{
    alert::{AlertDispatcher, run_alert_worker},
    config::MonitorConfig,
    feed::{run_ingestion, run_trade_feed},
    indicator::Rsi,
    monitor::AlertMonitor,
    snapshot::{CoinbaseCandles, SnapshotMerger},
    store::CandleStore,
};
use rustls::crypto::ring::default_provider;
use std::error::Error;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();

    init_logging();

    let config = MonitorConfig::from_env()?;
    info!(
        product_id = %config.product_id,
        timeframes = ?config.timeframes,
        window = config.rsi_window,
        overbought = config.thresholds.overbought,
        oversold = config.thresholds.oversold,
        retention = config.retention,
        "starting RSI monitor"
    );

    let store = CandleStore::new(config.retention, config.derived_timeframes());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Trade stream -> aggregator -> store
    let (tick_tx, tick_rx) = mpsc::channel(config.feed.channel_buffer_size);
    let feed = tokio::spawn(run_trade_feed(
        config.feed.clone(),
        config.product_id.clone(),
        tick_tx,
        shutdown_rx.clone(),
    ));
    let ingestion = tokio::spawn(run_ingestion(
        tick_rx,
        store.clone(),
        config.quiet_close_grace,
        shutdown_rx.clone(),
    ));

    // Historical snapshot -> store
    let merger = SnapshotMerger::new(
        store.clone(),
        CoinbaseCandles::new(&config.rest_url, &config.product_id),
    );
    let snapshots = tokio::spawn(merger.run(config.snapshot_interval, shutdown_rx.clone()));

    // Store -> RSI -> alerts
    let (dispatcher, alert_rx) = AlertDispatcher::new(config.alert.buffer_size);
    let alerts = tokio::spawn(run_alert_worker(alert_rx, config.alert.clone()));
    let monitor = AlertMonitor::new(
        store.clone(),
        config.timeframes.clone(),
        Rsi::new(config.rsi_window),
        config.thresholds,
        dispatcher,
    );
    let monitoring = tokio::spawn(monitor.run(config.monitor_interval, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    // The monitor owns the last dispatcher; once it stops the alert worker drains and exits
    for (name, result) in [
        ("feed", feed.await),
        ("snapshot", snapshots.await),
        ("monitor", monitoring.await),
        ("alerts", alerts.await),
    ] {
        if let Err(e) = result {
            warn!(task = name, error = %e, "task ended abnormally");
        }
    }

    match ingestion.await {
        Ok(aggregator) => info!(
            base_candles = store.len(),
            latest_bucket = ?store.latest_base().map(|candle| candle.timestamp),
            unflushed_ticks = aggregator.pending_len(),
            late_ticks = aggregator.late_ticks(),
            invalid_ticks = aggregator.invalid_ticks(),
            "RSI monitor stopped"
        ),
        Err(e) => warn!(task = "ingestion", error = %e, "task ended abnormally"),
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
