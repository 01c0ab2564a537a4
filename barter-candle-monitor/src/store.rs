//! Shared candle store: the bounded 1-minute base series plus every derived timeframe.
//!
//! All mutation goes through one write lock. Each mutating call runs the full
//! upsert -> trim -> resample sequence before releasing it, so readers only ever observe a
//! sorted, deduplicated, bounded base series with derived series computed from it.
//! Reads return owned copies.

use crate::{
    candle::{Candle, Timeframe},
    error::CandleError,
    resample::resample,
    series::BoundedSeries,
};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};
use tracing::debug;

/// Default base-series retention: 6 hours of 1-minute candles.
pub const DEFAULT_RETENTION: usize = 360;

/// Cloneable handle to the shared store.
#[derive(Debug, Clone)]
pub struct CandleStore {
    inner: Arc<RwLock<StoreState>>,
}

#[derive(Debug)]
struct StoreState {
    base: BoundedSeries,
    derived: BTreeMap<Timeframe, Vec<Candle>>,
}

impl StoreState {
    /// Enforce the retention bound and rebuild every derived series from the base.
    fn refresh(&mut self) {
        let evicted = self.base.trim();
        if evicted > 0 {
            debug!(evicted, retained = self.base.len(), "evicted oldest base candles");
        }

        let base = self.base.to_vec();
        for (timeframe, series) in self.derived.iter_mut() {
            *series = resample(&base, *timeframe);
        }
    }
}

impl CandleStore {
    /// Create a store retaining at most `retention` base candles and maintaining the given
    /// derived timeframes. The base timeframe is always present and is ignored if listed.
    pub fn new(retention: usize, derived: impl IntoIterator<Item = Timeframe>) -> Self {
        let derived = derived
            .into_iter()
            .filter(|timeframe| !timeframe.is_base())
            .map(|timeframe| (timeframe, Vec::new()))
            .collect();

        Self {
            inner: Arc::new(RwLock::new(StoreState {
                base: BoundedSeries::new(retention),
                derived,
            })),
        }
    }

    /// Insert or replace the base candle at `candle.timestamp`.
    ///
    /// Invalid candles are rejected and leave the store untouched.
    pub fn upsert_base(&self, candle: Candle) -> Result<(), CandleError> {
        candle.validate()?;

        let mut state = self.inner.write();
        state.base.upsert(candle);
        state.refresh();
        Ok(())
    }

    /// Apply a batch of upserts atomically, in order, with a single trim and resample.
    ///
    /// Every candle is validated first; one invalid candle rejects the whole batch.
    /// Returns the number of candles applied.
    pub fn upsert_base_batch(
        &self,
        candles: impl IntoIterator<Item = Candle>,
    ) -> Result<usize, CandleError> {
        let candles: Vec<Candle> = candles.into_iter().collect();
        candles.iter().try_for_each(Candle::validate)?;

        if candles.is_empty() {
            return Ok(0);
        }

        let mut state = self.inner.write();
        for candle in &candles {
            state.base.upsert(*candle);
        }
        state.refresh();
        Ok(candles.len())
    }

    /// Enforce the retention bound. Mutating operations already do this; returns the
    /// number of candles evicted.
    pub fn trim(&self) -> usize {
        let mut state = self.inner.write();
        let before = state.base.len();
        state.refresh();
        before - state.base.len()
    }

    /// Point-in-time copy of the base series.
    pub fn read_base(&self) -> Vec<Candle> {
        self.inner.read().base.to_vec()
    }

    /// Point-in-time copy of a derived series, `None` if `timeframe` is not maintained.
    pub fn read_derived(&self, timeframe: Timeframe) -> Option<Vec<Candle>> {
        self.inner.read().derived.get(&timeframe).cloned()
    }

    /// Closing prices of `timeframe`, oldest first.
    pub fn closes(&self, timeframe: Timeframe) -> Option<Vec<f64>> {
        let state = self.inner.read();
        if timeframe.is_base() {
            Some(state.base.iter().map(|candle| candle.close).collect())
        } else {
            state
                .derived
                .get(&timeframe)
                .map(|series| series.iter().map(|candle| candle.close).collect())
        }
    }

    /// Most recent base candle.
    pub fn latest_base(&self) -> Option<Candle> {
        self.inner.read().base.last().copied()
    }

    /// Base candle at exactly `timestamp`.
    pub fn base_at(&self, timestamp: &chrono::DateTime<chrono::Utc>) -> Option<Candle> {
        self.inner.read().base.get(timestamp).copied()
    }

    /// Base timeframe followed by every derived timeframe, ascending.
    pub fn timeframes(&self) -> Vec<Timeframe> {
        std::iter::once(Timeframe::ONE_MINUTE)
            .chain(self.inner.read().derived.keys().copied())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().base.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().base.is_empty()
    }

    pub fn retention(&self) -> usize {
        self.inner.read().base.capacity()
    }
}

impl Default for CandleStore {
    fn default() -> Self {
        Self::new(
            DEFAULT_RETENTION,
            [Timeframe::FIVE_MINUTES, Timeframe::FIFTEEN_MINUTES],
        )
    }
}
