//! Bounded, timestamp-keyed candle series.
//!
//! Keys are unique and iterate in ascending order, so deduplication and ordering hold by
//! construction. Length is capped at `capacity`; [`BoundedSeries::trim`] evicts the oldest
//! timestamps first.

use crate::candle::Candle;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct BoundedSeries {
    candles: BTreeMap<DateTime<Utc>, Candle>,
    capacity: usize,
}

impl BoundedSeries {
    /// Create an empty series holding at most `capacity` candles (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert or replace the candle at `candle.timestamp`, returning the replaced candle.
    ///
    /// Does not enforce the bound; callers follow a mutation sequence with [`Self::trim`].
    pub fn upsert(&mut self, candle: Candle) -> Option<Candle> {
        self.candles.insert(candle.timestamp, candle)
    }

    /// Evict oldest candles until the bound holds. Returns the number evicted.
    pub fn trim(&mut self) -> usize {
        let mut evicted = 0;
        while self.candles.len() > self.capacity {
            if self.candles.pop_first().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    /// Owned copy in ascending timestamp order.
    pub fn to_vec(&self) -> Vec<Candle> {
        self.candles.values().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candle> {
        self.candles.values()
    }

    pub fn get(&self, timestamp: &DateTime<Utc>) -> Option<&Candle> {
        self.candles.get(timestamp)
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first_key_value().map(|(_, candle)| candle)
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last_key_value().map(|(_, candle)| candle)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn candle(minute: i64, close: f64) -> Candle {
        let base = DateTime::from_timestamp(1_700_000_040, 0).unwrap();
        Candle {
            timestamp: base + TimeDelta::minutes(minute),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn test_upsert_replaces_same_timestamp() {
        let mut series = BoundedSeries::new(10);
        assert!(series.upsert(candle(0, 100.0)).is_none());
        let replaced = series.upsert(candle(0, 101.0));

        assert_eq!(replaced.map(|c| c.close), Some(100.0));
        assert_eq!(series.len(), 1);
        assert_eq!(series.last().map(|c| c.close), Some(101.0));
    }

    #[test]
    fn test_iterates_ascending_regardless_of_insert_order() {
        let mut series = BoundedSeries::new(10);
        for minute in [3, 0, 2, 1] {
            series.upsert(candle(minute, 100.0 + minute as f64));
        }

        let closes: Vec<f64> = series.iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![100.0, 101.0, 102.0, 103.0]);
    }

    #[test]
    fn test_trim_evicts_oldest_first() {
        let mut series = BoundedSeries::new(3);
        for minute in [4, 1, 0, 3, 2] {
            series.upsert(candle(minute, minute as f64 + 1.0));
        }

        assert_eq!(series.trim(), 2);
        assert_eq!(series.len(), 3);
        assert_eq!(series.first().map(|c| c.timestamp), Some(candle(2, 1.0).timestamp));
        assert_eq!(series.last().map(|c| c.timestamp), Some(candle(4, 1.0).timestamp));

        // Already within bound
        assert_eq!(series.trim(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut series = BoundedSeries::new(0);
        series.upsert(candle(0, 1.0));
        series.upsert(candle(1, 2.0));
        series.trim();

        assert_eq!(series.capacity(), 1);
        assert_eq!(series.to_vec(), vec![candle(1, 2.0)]);
    }
}
