//! Derive coarser timeframes from the 1-minute base series.
//!
//! Buckets are right-closed and right-labelled on the base candles' closing edges: a base
//! candle starting at `t` spans `[t, t + 1m)` and lands in the bucket labelled with the
//! first multiple of the bucket size at or after `t + 1m`. The 5-minute bucket labelled
//! `09:05` therefore holds the base candles starting `09:00` through `09:04`.

use crate::candle::{BASE_BUCKET_SECS, Candle, Timeframe};
use chrono::{DateTime, Utc};
use itertools::Itertools;

/// Closing-edge label of the `timeframe` bucket holding the base candle starting at `start`.
pub fn bucket_label(start: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    let size = timeframe.as_secs();
    let close_edge = start.timestamp() + BASE_BUCKET_SECS;
    let label = if close_edge.rem_euclid(size) == 0 {
        close_edge
    } else {
        (close_edge.div_euclid(size) + 1) * size
    };
    DateTime::from_timestamp(label, 0).unwrap_or(start)
}

/// Resample an ascending base series into `timeframe` candles.
///
/// Pure and idempotent. Buckets without base candles are omitted. Resampling to the base
/// timeframe returns the input unchanged.
pub fn resample(base: &[Candle], timeframe: Timeframe) -> Vec<Candle> {
    if timeframe.is_base() {
        return base.to_vec();
    }

    let mut derived = Vec::with_capacity(base.len() / timeframe.as_minutes() as usize + 1);
    let buckets = base
        .iter()
        .chunk_by(|candle| bucket_label(candle.timestamp, timeframe));

    for (label, mut members) in &buckets {
        let Some(first) = members.next() else {
            continue;
        };

        let candle = members.fold(
            Candle {
                timestamp: label,
                ..*first
            },
            |acc, next| Candle {
                high: acc.high.max(next.high),
                low: acc.low.min(next.low),
                close: next.close,
                volume: acc.volume + next.volume,
                ..acc
            },
        );
        derived.push(candle);
    }

    derived
}
