//! Candle record and timeframe definitions shared by every component.

use crate::error::{CandleError, ConfigError};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use derive_more::Display;
use std::str::FromStr;

/// Seconds in one base (1-minute) bucket.
pub const BASE_BUCKET_SECS: i64 = 60;

/// Bucket size of a candle series, in whole minutes.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{_0}m")]
pub struct Timeframe(u32);

impl Timeframe {
    /// The base series timeframe.
    pub const ONE_MINUTE: Self = Self(1);
    pub const FIVE_MINUTES: Self = Self(5);
    pub const FIFTEEN_MINUTES: Self = Self(15);

    /// Build a timeframe of `minutes` minutes, `None` for zero.
    pub fn minutes(minutes: u32) -> Option<Self> {
        (minutes > 0).then_some(Self(minutes))
    }

    pub fn as_minutes(&self) -> u32 {
        self.0
    }

    pub fn as_secs(&self) -> i64 {
        i64::from(self.0) * BASE_BUCKET_SECS
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::seconds(self.as_secs())
    }

    /// Check if this is the base (1-minute) timeframe.
    pub fn is_base(&self) -> bool {
        *self == Self::ONE_MINUTE
    }
}

impl FromStr for Timeframe {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        trimmed
            .strip_suffix('m')
            .and_then(|n| n.parse::<u32>().ok())
            .and_then(Self::minutes)
            .ok_or_else(|| ConfigError::InvalidTimeframe(trimmed.to_string()))
    }
}

/// One OHLCV bar. `timestamp` is the bucket start for base candles and the bucket's
/// closing edge for resampled candles. Volume is a trade count for live-built candles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Construct a validated candle.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleError> {
        let candle = Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    /// Check every field invariant. Candles built through struct literals must pass this
    /// before the store accepts them.
    pub fn validate(&self) -> Result<(), CandleError> {
        let prices = [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ];

        for (field, value) in prices.into_iter().chain([("volume", self.volume)]) {
            if !value.is_finite() {
                return Err(CandleError::NonFinite { field, value });
            }
        }

        for (field, value) in prices {
            if value <= 0.0 {
                return Err(CandleError::NonPositivePrice { field, value });
            }
        }

        if self.volume < 0.0 {
            return Err(CandleError::NegativeVolume(self.volume));
        }

        if self.low > self.open.min(self.close) || self.high < self.open.max(self.close) {
            return Err(CandleError::InconsistentRange {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        let secs = self.timestamp.timestamp();
        if secs.rem_euclid(BASE_BUCKET_SECS) != 0 || self.timestamp.timestamp_subsec_nanos() != 0 {
            return Err(CandleError::Misaligned(secs));
        }

        Ok(())
    }
}

/// Truncate a timestamp to the start of its 1-minute bucket.
pub fn floor_to_minute(time: DateTime<Utc>) -> DateTime<Utc> {
    floor_to_bucket(time, Timeframe::ONE_MINUTE)
}

/// Truncate a timestamp to the start of its `timeframe` bucket (aligned to the epoch).
pub fn floor_to_bucket(time: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    time.duration_trunc(timeframe.duration()).unwrap_or(time)
}

/// Build a UTC timestamp from epoch seconds.
pub fn from_epoch_secs(secs: i64) -> Result<DateTime<Utc>, CandleError> {
    DateTime::from_timestamp(secs, 0).ok_or(CandleError::TimestampOutOfRange(secs))
}
