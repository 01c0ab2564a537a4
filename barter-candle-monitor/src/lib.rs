//! Barter Candle Monitor
//!
//! Reconciles a live trade stream and periodic historical snapshots into one authoritative
//! 1-minute candle series, resamples it into coarser timeframes and raises RSI threshold
//! alerts per timeframe.
//!
//! The library includes:
//! - [`store::CandleStore`]: the single shared, bounded, lock-guarded candle store
//! - [`aggregator::TickAggregator`]: trades to 1-minute candles
//! - [`snapshot::SnapshotMerger`]: historical bar reconciliation
//! - [`resample::resample`] and [`indicator::Rsi`]: pure derivations
//! - [`monitor::AlertMonitor`]: periodic classification and alert dispatch
//! - [`feed`]: Coinbase trade stream client and ingestion loop
pub mod aggregator;
pub mod alert;
pub mod candle;
pub mod config;
pub mod error;
pub mod feed;
pub mod indicator;
pub mod monitor;
pub mod resample;
pub mod series;
pub mod snapshot;
pub mod store;

// Re-export commonly used types for convenience
pub use aggregator::{Tick, TickAggregator};
pub use alert::{Alert, AlertConfig, AlertDispatcher, AlertSink};
pub use candle::{Candle, Timeframe};
pub use config::MonitorConfig;
pub use error::{CandleError, ConfigError, FeedError};
pub use feed::FeedConfig;
pub use indicator::Rsi;
pub use monitor::{AlertMonitor, Classification, Reading, Thresholds};
pub use snapshot::{CoinbaseCandles, HistoricalBar, HistoricalBars, MergeReport, SnapshotMerger};
pub use store::CandleStore;
