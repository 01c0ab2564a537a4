//! 1-minute bar aggregation from live trade ticks.
//!
//! Uses trade timestamps (not wall clock) for bucket boundaries. A bucket is finalized only
//! when a trade from a later bucket arrives, or by an explicit [`TickAggregator::flush_stale`].

use crate::{
    candle::{Candle, floor_to_minute},
    error::CandleError,
};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, warn};

/// A single trade price observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub time: DateTime<Utc>,
    pub price: f64,
}

impl Tick {
    pub fn new(time: DateTime<Utc>, price: f64) -> Self {
        Self { time, price }
    }
}

/// How far behind the reference bucket a tick may fall and still count as a straggler.
///
/// Ticks further back restart aggregation at their own bucket instead of being dropped.
pub const LATE_TICK_WINDOW: TimeDelta = TimeDelta::minutes(5);

/// Aggregates ticks into 1-minute OHLCV candles (volume = trade count).
#[derive(Debug, Default)]
pub struct TickAggregator {
    /// Start of the open bucket
    current_bucket: Option<DateTime<Utc>>,
    /// Bucket most recently folded into a candle
    last_finalized: Option<DateTime<Utc>>,
    /// Ticks observed in the open bucket, in arrival order
    pending: Vec<Tick>,
    /// Ticks dropped because their bucket was already closed
    late_ticks: u64,
    /// Ticks dropped for a non-finite or non-positive price
    invalid_ticks: u64,
}

impl TickAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one tick. Returns `Some(candle)` when the tick closes the open bucket.
    pub fn update(&mut self, tick: Tick) -> Option<Candle> {
        // Guard: ignore invalid prices
        if !tick.price.is_finite() || tick.price <= 0.0 {
            self.invalid_ticks += 1;
            return None;
        }

        let bucket = floor_to_minute(tick.time);

        if self.is_late(bucket) {
            // Folding it again would overwrite the full candle of an already closed bucket
            self.late_ticks += 1;
            debug!(
                tick_time = %tick.time,
                open_bucket = ?self.current_bucket,
                last_finalized = ?self.last_finalized,
                "discarding late tick"
            );
            return None;
        }

        match self.current_bucket {
            None => {
                self.current_bucket = Some(bucket);
                self.pending.push(tick);
                None
            }
            Some(current) if bucket == current => {
                self.pending.push(tick);
                None
            }
            Some(current) => {
                if bucket < current {
                    warn!(
                        tick_time = %tick.time,
                        open_bucket = %current,
                        "tick far behind the open bucket, restarting aggregation"
                    );
                }
                let finalized = self.fold(current);
                self.current_bucket = Some(bucket);
                self.pending.push(tick);
                finalized
            }
        }
    }

    /// A tick is late when its bucket is already closed and lies within [`LATE_TICK_WINDOW`]
    /// of the open bucket (or of the last finalized one while nothing is open).
    fn is_late(&self, bucket: DateTime<Utc>) -> bool {
        let (reference, closed) = match (self.current_bucket, self.last_finalized) {
            (Some(current), _) => (current, bucket < current),
            (None, Some(finalized)) => (finalized, bucket <= finalized),
            (None, None) => return false,
        };
        closed && bucket >= reference - LATE_TICK_WINDOW
    }

    /// Force-close the open bucket once `now` has passed its end by at least `grace`.
    ///
    /// The next tick after a flush starts a fresh bucket unless it belongs to the flushed one.
    pub fn flush_stale(&mut self, now: DateTime<Utc>, grace: TimeDelta) -> Option<Candle> {
        let current = self.current_bucket?;
        if now < current + TimeDelta::minutes(1) + grace {
            return None;
        }

        let finalized = self.fold(current);
        self.current_bucket = None;
        finalized
    }

    /// Drain the pending buffer into a candle for `bucket`.
    fn fold(&mut self, bucket: DateTime<Utc>) -> Option<Candle> {
        let ticks = std::mem::take(&mut self.pending);
        self.last_finalized = Some(bucket);
        match build_candle(bucket, &ticks)? {
            Ok(candle) => Some(candle),
            Err(e) => {
                error!(%bucket, error = %e, "failed to build candle from ticks");
                None
            }
        }
    }

    /// Start of the open bucket, if any tick has been seen.
    pub fn current_bucket(&self) -> Option<DateTime<Utc>> {
        self.current_bucket
    }

    /// Number of ticks buffered in the open bucket.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn late_ticks(&self) -> u64 {
        self.late_ticks
    }

    pub fn invalid_ticks(&self) -> u64 {
        self.invalid_ticks
    }
}

/// Fold ticks of one bucket into a candle; `None` for an empty bucket.
pub fn build_candle(bucket: DateTime<Utc>, ticks: &[Tick]) -> Option<Result<Candle, CandleError>> {
    let first = ticks.first()?;
    let last = ticks.last()?;

    let (high, low) = ticks
        .iter()
        .fold((f64::MIN, f64::MAX), |(high, low), tick| {
            (high.max(tick.price), low.min(tick.price))
        });

    Some(Candle::new(
        bucket,
        first.price,
        high,
        low,
        last.price,
        ticks.len() as f64,
    ))
}
