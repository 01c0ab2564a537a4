use thiserror::Error;

/// Reasons a [`Candle`](crate::candle::Candle) is refused by construction or by the
/// [`CandleStore`](crate::store::CandleStore).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleError {
    #[error("candle field {field} is not finite: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("candle price {field} must be positive: {value}")]
    NonPositivePrice { field: &'static str, value: f64 },

    #[error("candle volume must not be negative: {0}")]
    NegativeVolume(f64),

    #[error("candle range inconsistent: high {high} low {low} open {open} close {close}")]
    InconsistentRange {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },

    #[error("candle timestamp {0} is not aligned to a whole minute")]
    Misaligned(i64),

    #[error("timestamp out of representable range: {0}")]
    TimestampOutOfRange(i64),
}

/// Errors produced by the upstream market-data collaborators.
///
/// Every variant is transient from the engine's point of view: the current cycle (or
/// message) is skipped and prior state is kept.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("HTTP error status: {0}")]
    Status(u16),

    #[error("failed to parse upstream payload: {0}")]
    Parse(String),

    #[error("SocketError: {0}")]
    Socket(String),

    #[error("read timeout: no data received for {0} seconds")]
    Timeout(u64),
}

impl FeedError {
    /// Determine if the error came from the network rather than from the payload.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_network(&self) -> bool {
        match self {
            FeedError::Parse(_) => false,
            _ => true,
        }
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Parse(value.to_string())
        } else if let Some(status) = value.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Http(value.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

/// Invalid configuration value read from the environment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid timeframe: {0:?} (expected e.g. \"5m\")")]
    InvalidTimeframe(String),

    #[error("RSI window must be at least 2, got {0}")]
    WindowTooSmall(usize),

    #[error("oversold threshold {oversold} must be below overbought threshold {overbought}")]
    ThresholdOrder { oversold: f64, overbought: f64 },

    #[error("retention must hold at least one candle")]
    ZeroRetention,
}
