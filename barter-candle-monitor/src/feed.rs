//! Live trade stream client and the ingestion loop that turns trades into base candles.
//!
//! The client subscribes to the Coinbase Exchange `matches` channel and reconnects after a
//! fixed delay on any failure. A socket that goes silent is treated as a failure.

use crate::{
    aggregator::{Tick, TickAggregator},
    candle::Candle,
    error::FeedError,
    store::CandleStore,
};
use chrono::{DateTime, TimeDelta, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, MissedTickBehavior},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub const DEFAULT_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";

/// How often the ingestion loop checks for a quiet bucket to force-close.
const FLUSH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Trades stamped further than this ahead of the local clock are dropped before aggregation.
pub const MAX_FUTURE_SKEW: TimeDelta = TimeDelta::seconds(60);

/// Trade stream configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// WebSocket endpoint URL
    pub url: String,
    /// Ping interval to keep connection alive
    pub ping_interval: Duration,
    /// Reconnection delay after disconnect
    pub reconnect_delay: Duration,
    /// Reconnect if no frame arrives for this long
    pub read_timeout: Duration,
    /// Maximum channel buffer size for ticks
    pub channel_buffer_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            read_timeout: Duration::from_secs(120),
            channel_buffer_size: 1000,
        }
    }
}

impl FeedConfig {
    /// Create a new configuration with custom URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set ping interval
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set idle read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set channel buffer size
    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }
}

#[derive(Debug, Serialize)]
struct Subscribe<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    product_ids: [&'a str; 1],
    channels: [&'static str; 1],
}

impl<'a> Subscribe<'a> {
    fn matches(product_id: &'a str) -> Self {
        Self {
            kind: "subscribe",
            product_ids: [product_id],
            channels: ["matches"],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CoinbaseMessage {
    Match(CoinbaseTrade),
    /// Replayed most recent trade sent right after subscribing
    LastMatch(CoinbaseTrade),
    Subscriptions,
    Error {
        message: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct CoinbaseTrade {
    product_id: String,
    time: DateTime<Utc>,
    price: String,
}

/// Extract a [`Tick`] for `product_id` from a raw feed message.
///
/// Non-trade messages, trades on other instruments and malformed payloads yield `None`.
pub fn parse_trade(text: &str, product_id: &str) -> Option<Tick> {
    let message = match serde_json::from_str::<CoinbaseMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, raw = text, "discarding malformed feed message");
            return None;
        }
    };

    match message {
        CoinbaseMessage::Match(trade) | CoinbaseMessage::LastMatch(trade) => {
            if trade.product_id != product_id {
                debug!(product_id = %trade.product_id, "discarding off-instrument trade");
                return None;
            }

            match trade.price.parse::<f64>() {
                Ok(price) => Some(Tick::new(trade.time, price)),
                Err(_) => {
                    debug!(price = %trade.price, "discarding trade with unparseable price");
                    None
                }
            }
        }
        CoinbaseMessage::Subscriptions => {
            debug!("subscription confirmed");
            None
        }
        CoinbaseMessage::Error { message, reason } => {
            warn!(%message, ?reason, "feed error message");
            None
        }
        CoinbaseMessage::Other => None,
    }
}

/// Why a websocket session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Closed,
    ReceiverDropped,
}

/// Stream trades for `product_id` into `tx`, reconnecting forever until shutdown or until the
/// receiver is dropped.
pub async fn run_trade_feed(
    config: FeedConfig,
    product_id: String,
    tx: mpsc::Sender<Tick>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(url = %config.url, %product_id, "starting trade feed");

    loop {
        let outcome = tokio::select! {
            outcome = stream_trades(&config, &product_id, &tx) => outcome,
            _ = shutdown.changed() => break,
        };

        match outcome {
            Ok(SessionEnd::ReceiverDropped) => {
                warn!("tick receiver dropped, stopping trade feed");
                break;
            }
            Ok(SessionEnd::Closed) => info!("feed connection closed, will reconnect"),
            Err(e) if e.is_network() => warn!(error = %e, "feed connection failed, will reconnect"),
            Err(e) => error!(error = %e, "feed protocol error, will reconnect"),
        }

        debug!(delay = ?config.reconnect_delay, "waiting before reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!("trade feed stopped");
}

/// One websocket session: connect, subscribe, forward trades.
async fn stream_trades(
    config: &FeedConfig,
    product_id: &str,
    tx: &mpsc::Sender<Tick>,
) -> Result<SessionEnd, FeedError> {
    let (ws_stream, _) = connect_async(config.url.as_str()).await?;
    info!(url = %config.url, "connected to trade feed");

    let (mut write, mut read) = ws_stream.split();

    let subscribe = serde_json::to_string(&Subscribe::matches(product_id))?;
    write.send(Message::Text(subscribe.into())).await?;

    let mut ping = tokio::time::interval_at(
        Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let idle = tokio::time::sleep(config.read_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = &mut idle => {
                return Err(FeedError::Timeout(config.read_timeout.as_secs()));
            }
            _ = ping.tick() => {
                write.send(Message::Ping(Vec::new().into())).await?;
            }
            message = read.next() => {
                idle.as_mut().reset(Instant::now() + config.read_timeout);

                match message {
                    None => return Ok(SessionEnd::Closed),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(Message::Text(text))) => {
                        if let Some(tick) = parse_trade(text.as_str(), product_id) {
                            if tx.send(tick).await.is_err() {
                                return Ok(SessionEnd::ReceiverDropped);
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "server closed connection");
                        return Ok(SessionEnd::Closed);
                    }
                    // Pings are answered by tungstenite
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Drive a [`TickAggregator`] from `rx` and upsert every finalized candle into `store`.
///
/// With `quiet_close_grace` set, an open bucket with no follow-up trade is force-closed once
/// the wall clock passes its end by the grace period. Returns the aggregator when the channel
/// closes or on shutdown; the open bucket is left unflushed.
pub async fn run_ingestion(
    mut rx: mpsc::Receiver<Tick>,
    store: CandleStore,
    quiet_close_grace: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) -> TickAggregator {
    let mut aggregator = TickAggregator::new();
    let mut future_ticks: u64 = 0;
    let grace = quiet_close_grace.and_then(|grace| TimeDelta::from_std(grace).ok());

    let mut flush =
        tokio::time::interval_at(Instant::now() + FLUSH_CHECK_INTERVAL, FLUSH_CHECK_INTERVAL);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            tick = rx.recv() => match tick {
                Some(tick) if tick.time > Utc::now() + MAX_FUTURE_SKEW => {
                    future_ticks += 1;
                    warn!(tick_time = %tick.time, "discarding trade stamped in the future");
                }
                Some(tick) => {
                    if let Some(candle) = aggregator.update(tick) {
                        commit(&store, candle);
                    }
                }
                None => break,
            },
            _ = flush.tick(), if grace.is_some() => {
                if let Some(candle) = grace.and_then(|grace| aggregator.flush_stale(Utc::now(), grace)) {
                    debug!(bucket = %candle.timestamp, "force-closed quiet bucket");
                    commit(&store, candle);
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    info!(
        late_ticks = aggregator.late_ticks(),
        invalid_ticks = aggregator.invalid_ticks(),
        future_ticks,
        "ingestion stopped"
    );
    aggregator
}

fn commit(store: &CandleStore, candle: Candle) {
    match store.upsert_base(candle) {
        Ok(()) => debug!(
            bucket = %candle.timestamp,
            close = candle.close,
            trades = candle.volume,
            "live candle closed"
        ),
        Err(e) => error!(bucket = %candle.timestamp, error = %e, "store rejected live candle"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_config_builder() {
        let config = FeedConfig::new("ws://localhost:8080")
            .with_ping_interval(Duration::from_secs(15))
            .with_reconnect_delay(Duration::from_secs(5))
            .with_read_timeout(Duration::from_secs(60))
            .with_channel_buffer_size(500);

        assert_eq!(config.url, "ws://localhost:8080");
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
        assert_eq!(config.channel_buffer_size, 500);
    }

    #[test]
    fn test_default_config() {
        let config = FeedConfig::default();
        assert_eq!(config.url, "wss://ws-feed.exchange.coinbase.com");
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.read_timeout, Duration::from_secs(120));
        assert_eq!(config.channel_buffer_size, 1000);
    }

    #[test]
    fn test_subscribe_message() {
        let json = serde_json::to_string(&Subscribe::matches("BTC-USD")).unwrap();
        assert_eq!(
            json,
            r#"{"type":"subscribe","product_ids":["BTC-USD"],"channels":["matches"]}"#
        );
    }

    #[test]
    fn test_parse_trade() {
        struct TestCase {
            input: &'static str,
            expected: Option<Tick>,
        }

        let tests = vec![
            TestCase {
                // TC0: match on the tracked instrument
                input: r#"{"type":"match","trade_id":1,"side":"buy","size":"0.01","price":"64000.50","product_id":"BTC-USD","sequence":10,"time":"2024-03-01T09:00:10Z"}"#,
                expected: Some(Tick::new(at(9, 0, 10), 64000.50)),
            },
            TestCase {
                // TC1: last_match replayed on subscribe
                input: r#"{"type":"last_match","price":"100","product_id":"BTC-USD","time":"2024-03-01T09:00:40Z"}"#,
                expected: Some(Tick::new(at(9, 0, 40), 100.0)),
            },
            TestCase {
                // TC2: off-instrument trade
                input: r#"{"type":"match","price":"3000","product_id":"ETH-USD","time":"2024-03-01T09:00:10Z"}"#,
                expected: None,
            },
            TestCase {
                // TC3: unparseable price
                input: r#"{"type":"match","price":"abc","product_id":"BTC-USD","time":"2024-03-01T09:00:10Z"}"#,
                expected: None,
            },
            TestCase {
                // TC4: trade missing its time
                input: r#"{"type":"match","price":"100","product_id":"BTC-USD"}"#,
                expected: None,
            },
            TestCase {
                // TC5: subscription ack
                input: r#"{"type":"subscriptions","channels":[{"name":"matches","product_ids":["BTC-USD"]}]}"#,
                expected: None,
            },
            TestCase {
                // TC6: unknown message type
                input: r#"{"type":"heartbeat","sequence":1}"#,
                expected: None,
            },
            TestCase {
                // TC7: error message
                input: r#"{"type":"error","message":"Failed to subscribe","reason":"BTC-XYZ is not a valid product"}"#,
                expected: None,
            },
            TestCase {
                // TC8: not json
                input: "not json",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = parse_trade(test.input, "BTC-USD");
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[tokio::test]
    async fn test_ingestion_commits_finalized_candles() {
        let store = CandleStore::default();
        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_ingestion(rx, store.clone(), None, shutdown_rx));

        for (time, price) in [
            (at(9, 0, 10), 100.0),
            (at(9, 0, 40), 105.0),
            (at(9, 1, 5), 102.0),
            (at(9, 0, 50), 1.0),
        ] {
            tx.send(Tick::new(time, price)).await.unwrap();
        }
        drop(tx);

        let aggregator = handle.await.unwrap();

        let base = store.read_base();
        assert_eq!(base.len(), 1);
        assert_eq!(base[0].timestamp, at(9, 0, 0));
        assert_eq!(base[0].open, 100.0);
        assert_eq!(base[0].high, 105.0);
        assert_eq!(base[0].low, 100.0);
        assert_eq!(base[0].close, 105.0);
        assert_eq!(base[0].volume, 2.0);

        // 09:01 is still open and the stray 09:00 tick was dropped
        assert_eq!(aggregator.current_bucket(), Some(at(9, 1, 0)));
        assert_eq!(aggregator.late_ticks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ingestion_force_closes_quiet_bucket() {
        let store = CandleStore::default();
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_ingestion(
            rx,
            store.clone(),
            Some(Duration::ZERO),
            shutdown_rx,
        ));

        // Bucket ended long ago by wall clock, so the next flush check closes it
        tx.send(Tick::new(at(9, 0, 10), 100.0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.latest_base().map(|c| c.timestamp), Some(at(9, 0, 0)));

        shutdown_tx.send(true).unwrap();
        let aggregator = handle.await.unwrap();
        assert_eq!(aggregator.current_bucket(), None);
    }

    #[tokio::test]
    async fn test_ingestion_drops_future_stamped_trades() {
        let store = CandleStore::default();
        let (tx, rx) = mpsc::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_ingestion(rx, store.clone(), None, shutdown_rx));

        let future = Utc.with_ymd_and_hms(2200, 1, 1, 0, 0, 0).unwrap();
        tx.send(Tick::new(at(9, 0, 10), 100.0)).await.unwrap();
        tx.send(Tick::new(future, 100.0)).await.unwrap();
        tx.send(Tick::new(at(9, 1, 10), 101.0)).await.unwrap();
        tx.send(Tick::new(at(9, 2, 10), 102.0)).await.unwrap();
        drop(tx);

        let aggregator = handle.await.unwrap();

        let minutes: Vec<_> = store.read_base().iter().map(|c| c.timestamp).collect();
        assert_eq!(minutes, vec![at(9, 0, 0), at(9, 1, 0)]);
        assert_eq!(aggregator.current_bucket(), Some(at(9, 2, 0)));
        assert_eq!(aggregator.late_ticks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_trade_after_quiet_close_keeps_full_candle() {
        let store = CandleStore::default();
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_ingestion(
            rx,
            store.clone(),
            Some(Duration::ZERO),
            shutdown_rx,
        ));

        for (second, price) in [(10, 100.0), (20, 103.0), (30, 99.0), (40, 101.0)] {
            tx.send(Tick::new(at(9, 0, second), price)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(3)).await;

        tx.send(Tick::new(at(9, 0, 59), 104.0)).await.unwrap();
        tx.send(Tick::new(at(9, 1, 10), 105.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        shutdown_tx.send(true).unwrap();
        let aggregator = handle.await.unwrap();

        let candle = store.base_at(&at(9, 0, 0)).unwrap();
        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.high, 103.0);
        assert_eq!(candle.low, 99.0);
        assert_eq!(candle.close, 101.0);
        assert_eq!(candle.volume, 4.0);
        assert_eq!(aggregator.late_ticks(), 1);
    }

    #[tokio::test]
    async fn test_ingestion_stops_on_shutdown() {
        let (_tx, rx) = mpsc::channel::<Tick>(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_ingestion(rx, CandleStore::default(), None, shutdown_rx));
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("ingestion should stop on shutdown")
            .unwrap();
    }
}
