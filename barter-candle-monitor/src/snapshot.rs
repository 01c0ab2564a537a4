//! Periodic reconciliation of the base series against historical bars.

use crate::{
    candle::{Candle, floor_to_minute, from_epoch_secs},
    error::{CandleError, FeedError},
    store::CandleStore,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_REST_URL: &str = "https://api.exchange.coinbase.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One historical 1-minute bar as delivered by the upstream API. `timestamp` is epoch
/// seconds and is not assumed to be minute aligned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalBar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl HistoricalBar {
    /// Floor to the minute and validate.
    pub fn to_candle(&self) -> Result<Candle, CandleError> {
        let timestamp = floor_to_minute(from_epoch_secs(self.timestamp)?);
        Candle::new(
            timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        )
    }
}

/// Source of recent historical 1-minute bars.
#[async_trait]
pub trait HistoricalBars: Send + Sync {
    async fn fetch_recent(&self) -> Result<Vec<HistoricalBar>, FeedError>;
}

#[async_trait]
impl<T> HistoricalBars for Arc<T>
where
    T: HistoricalBars + ?Sized,
{
    async fn fetch_recent(&self) -> Result<Vec<HistoricalBar>, FeedError> {
        (**self).fetch_recent().await
    }
}

/// Coinbase Exchange row: `[time, low, high, open, close, volume]`.
#[derive(Debug, Deserialize)]
struct CoinbaseCandleRow(i64, f64, f64, f64, f64, f64);

impl From<CoinbaseCandleRow> for HistoricalBar {
    fn from(row: CoinbaseCandleRow) -> Self {
        Self {
            timestamp: row.0,
            low: row.1,
            high: row.2,
            open: row.3,
            close: row.4,
            volume: row.5,
        }
    }
}

/// [`HistoricalBars`] backed by the Coinbase Exchange `candles` endpoint.
#[derive(Debug, Clone)]
pub struct CoinbaseCandles {
    client: reqwest::Client,
    url: String,
}

impl CoinbaseCandles {
    pub fn new(rest_url: &str, product_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!(
                "{}/products/{}/candles?granularity=60",
                rest_url.trim_end_matches('/'),
                product_id
            ),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HistoricalBars for CoinbaseCandles {
    async fn fetch_recent(&self) -> Result<Vec<HistoricalBar>, FeedError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::USER_AGENT, "rsi-monitor")
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FeedError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        parse_candles(&body)
    }
}

/// Decode a Coinbase `candles` response body.
pub fn parse_candles(body: &str) -> Result<Vec<HistoricalBar>, FeedError> {
    let rows: Vec<CoinbaseCandleRow> = serde_json::from_str(body)?;
    Ok(rows.into_iter().map(HistoricalBar::from).collect())
}

/// Outcome of one merge cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Bars returned by the source
    pub received: usize,
    /// Candles upserted into the store
    pub applied: usize,
    /// Malformed bars dropped
    pub discarded: usize,
}

/// Merges historical bars into the [`CandleStore`] on a fixed period.
pub struct SnapshotMerger<H> {
    store: CandleStore,
    source: H,
}

impl<H> SnapshotMerger<H>
where
    H: HistoricalBars,
{
    pub fn new(store: CandleStore, source: H) -> Self {
        Self { store, source }
    }

    /// Fetch one batch and apply it as a single atomic store mutation.
    ///
    /// Bars are applied in the order received, so the latest bar for a bucket wins. On a
    /// fetch failure the store is left untouched.
    pub async fn run_cycle(&self) -> Result<MergeReport, FeedError> {
        let bars = self.source.fetch_recent().await?;

        let mut report = MergeReport {
            received: bars.len(),
            ..MergeReport::default()
        };

        let candles: Vec<Candle> = bars
            .iter()
            .filter_map(|bar| match bar.to_candle() {
                Ok(candle) => Some(candle),
                Err(e) => {
                    warn!(timestamp = bar.timestamp, error = %e, "discarding malformed bar");
                    report.discarded += 1;
                    None
                }
            })
            .collect();

        // Every candle was validated above, so the batch cannot be rejected
        match self.store.upsert_base_batch(candles) {
            Ok(applied) => report.applied = applied,
            Err(e) => error!(error = %e, "snapshot batch rejected by store"),
        }

        Ok(report)
    }

    /// Run [`Self::run_cycle`] every `period`, first cycle immediately, until `shutdown`
    /// flips or its sender drops.
    pub async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(report) => info!(
                            received = report.received,
                            applied = report.applied,
                            discarded = report.discarded,
                            base_len = self.store.len(),
                            "snapshot merged"
                        ),
                        Err(e) if e.is_network() => {
                            warn!(error = %e, "snapshot fetch failed, keeping current state")
                        }
                        Err(e) => {
                            error!(error = %e, "snapshot payload rejected, keeping current state")
                        }
                    }
                }
                _ = shutdown.changed() => {
                    debug!("snapshot merger shutting down");
                    break;
                }
            }
        }
    }
}
