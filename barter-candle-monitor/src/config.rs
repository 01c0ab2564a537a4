//! Runtime configuration.
//!
//! Every value has a default and can be overridden through an `RSI_*` environment variable.

use crate::{
    alert::AlertConfig,
    candle::Timeframe,
    error::ConfigError,
    feed::FeedConfig,
    indicator::DEFAULT_RSI_WINDOW,
    monitor::Thresholds,
    snapshot::DEFAULT_REST_URL,
    store::DEFAULT_RETENTION,
};
use std::{str::FromStr, time::Duration};

/// Full configuration of the monitor process.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Instrument tracked by both feeds (e.g. "BTC-USD")
    pub product_id: String,
    /// Trade stream connection settings
    pub feed: FeedConfig,
    /// Base URL of the historical bars REST API
    pub rest_url: String,
    /// Timeframes monitored by the alert loop (base timeframe included)
    pub timeframes: Vec<Timeframe>,
    pub rsi_window: usize,
    pub thresholds: Thresholds,
    /// Maximum number of base candles retained
    pub retention: usize,
    pub snapshot_interval: Duration,
    pub monitor_interval: Duration,
    /// Force-close a quiet bucket this long after its end; `None` keeps it open until the
    /// next trade
    pub quiet_close_grace: Option<Duration>,
    pub alert: AlertConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            product_id: "BTC-USD".to_string(),
            feed: FeedConfig::default(),
            rest_url: DEFAULT_REST_URL.to_string(),
            timeframes: vec![
                Timeframe::ONE_MINUTE,
                Timeframe::FIVE_MINUTES,
                Timeframe::FIFTEEN_MINUTES,
            ],
            rsi_window: DEFAULT_RSI_WINDOW,
            thresholds: Thresholds::default(),
            retention: DEFAULT_RETENTION,
            snapshot_interval: Duration::from_secs(300),
            monitor_interval: Duration::from_secs(15),
            quiet_close_grace: None,
            alert: AlertConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Build from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, falling back to defaults for missing keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut feed = defaults.feed;
        if let Some(url) = text("RSI_WS_URL") {
            feed.url = url;
        }
        if let Some(secs) = parse_value::<u64>("RSI_RECONNECT_SECS", text("RSI_RECONNECT_SECS"))? {
            feed.reconnect_delay = Duration::from_secs(secs);
        }

        let timeframes = match text("RSI_TIMEFRAMES") {
            Some(raw) => parse_timeframes(&raw)?,
            None => defaults.timeframes,
        };

        let thresholds = Thresholds {
            overbought: parse_value("RSI_OVERBOUGHT", text("RSI_OVERBOUGHT"))?
                .unwrap_or(defaults.thresholds.overbought),
            oversold: parse_value("RSI_OVERSOLD", text("RSI_OVERSOLD"))?
                .unwrap_or(defaults.thresholds.oversold),
        };

        let mut alert = defaults.alert;
        if let Some(command) = text("RSI_ALERT_SOUND") {
            alert.sound_command = Some(command);
        }
        if let Some(repeats) = parse_value("RSI_ALERT_REPEATS", text("RSI_ALERT_REPEATS"))? {
            alert.repeats = repeats;
        }

        let secs = |key: &'static str| -> Result<Option<Duration>, ConfigError> {
            Ok(parse_value::<u64>(key, text(key))?.map(Duration::from_secs))
        };

        let config = Self {
            product_id: text("RSI_PRODUCT_ID").unwrap_or(defaults.product_id),
            feed,
            rest_url: text("RSI_REST_URL").unwrap_or(defaults.rest_url),
            timeframes,
            rsi_window: parse_value("RSI_WINDOW", text("RSI_WINDOW"))?
                .unwrap_or(defaults.rsi_window),
            thresholds,
            retention: parse_value("RSI_RETENTION", text("RSI_RETENTION"))?
                .unwrap_or(defaults.retention),
            snapshot_interval: secs("RSI_SNAPSHOT_SECS")?.unwrap_or(defaults.snapshot_interval),
            monitor_interval: secs("RSI_MONITOR_SECS")?.unwrap_or(defaults.monitor_interval),
            quiet_close_grace: secs("RSI_QUIET_CLOSE_SECS")?,
            alert,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rsi_window < 2 {
            return Err(ConfigError::WindowTooSmall(self.rsi_window));
        }
        if self.thresholds.oversold >= self.thresholds.overbought {
            return Err(ConfigError::ThresholdOrder {
                oversold: self.thresholds.oversold,
                overbought: self.thresholds.overbought,
            });
        }
        if self.retention == 0 {
            return Err(ConfigError::ZeroRetention);
        }
        Ok(())
    }

    /// Set the tracked instrument
    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = product_id.into();
        self
    }

    /// Set monitored timeframes
    pub fn with_timeframes(mut self, timeframes: Vec<Timeframe>) -> Self {
        self.timeframes = timeframes;
        self
    }

    /// Set base-series retention
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Enable the quiet-bucket force close
    pub fn with_quiet_close_grace(mut self, grace: Duration) -> Self {
        self.quiet_close_grace = Some(grace);
        self
    }

    /// Derived timeframes the store must maintain.
    pub fn derived_timeframes(&self) -> Vec<Timeframe> {
        self.timeframes
            .iter()
            .copied()
            .filter(|timeframe| !timeframe.is_base())
            .collect()
    }
}

fn parse_value<T: FromStr>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value })
    })
    .transpose()
}

/// Parse a comma separated list such as `"1m,5m,15m"`, sorted and deduplicated.
pub fn parse_timeframes(raw: &str) -> Result<Vec<Timeframe>, ConfigError> {
    let mut timeframes = raw
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse::<Timeframe>)
        .collect::<Result<Vec<_>, _>>()?;

    timeframes.sort();
    timeframes.dedup();

    if timeframes.is_empty() {
        return Err(ConfigError::InvalidTimeframe(raw.to_string()));
    }
    Ok(timeframes)
}
