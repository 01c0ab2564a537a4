//! Periodic RSI threshold monitor across every configured timeframe.

use crate::{
    alert::{Alert, AlertSink},
    candle::Timeframe,
    indicator::Rsi,
    store::CandleStore,
};
use derive_more::Display;
use std::time::Duration;
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info};

/// RSI regime of one timeframe
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    #[display("overbought")]
    Overbought,
    #[display("oversold")]
    Oversold,
    #[display("normal")]
    Normal,
    /// Not enough closes to compute the indicator
    #[display("waiting")]
    Waiting,
}

impl Classification {
    /// Check if this classification should raise an alert
    pub fn is_alert(&self) -> bool {
        matches!(self, Classification::Overbought | Classification::Oversold)
    }
}

/// Strict alert thresholds: a value must be above `overbought` or below `oversold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub overbought: f64,
    pub oversold: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            overbought: 70.0,
            oversold: 30.0,
        }
    }
}

impl Thresholds {
    pub fn classify(&self, value: Option<f64>) -> Classification {
        match value {
            None => Classification::Waiting,
            Some(v) if v > self.overbought => Classification::Overbought,
            Some(v) if v < self.oversold => Classification::Oversold,
            Some(_) => Classification::Normal,
        }
    }
}

/// Indicator reading for one timeframe in one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub timeframe: Timeframe,
    pub value: Option<f64>,
    pub classification: Classification,
}

/// Polls the store, classifies each timeframe's RSI and dispatches alerts.
pub struct AlertMonitor<S> {
    store: CandleStore,
    timeframes: Vec<Timeframe>,
    rsi: Rsi,
    thresholds: Thresholds,
    sink: S,
}

impl<S> AlertMonitor<S>
where
    S: AlertSink,
{
    pub fn new(
        store: CandleStore,
        timeframes: Vec<Timeframe>,
        rsi: Rsi,
        thresholds: Thresholds,
        sink: S,
    ) -> Self {
        Self {
            store,
            timeframes,
            rsi,
            thresholds,
            sink,
        }
    }

    /// Evaluate every timeframe once. Alerts are dispatched without waiting on delivery.
    pub fn run_cycle(&self) -> Vec<Reading> {
        let readings: Vec<Reading> = self
            .timeframes
            .iter()
            .map(|&timeframe| {
                // Copy out of the store first so the indicator never runs under its lock
                let value = self
                    .store
                    .closes(timeframe)
                    .and_then(|closes| self.rsi.compute(&closes));

                Reading {
                    timeframe,
                    value,
                    classification: self.thresholds.classify(value),
                }
            })
            .collect();

        for reading in &readings {
            if let (Some(value), true) = (reading.value, reading.classification.is_alert()) {
                self.sink.dispatch(Alert {
                    timeframe: reading.timeframe,
                    value,
                    classification: reading.classification,
                });
            }
        }

        info!("{}", format_status(&readings));
        readings
    }

    /// Run [`Self::run_cycle`] every `period` until `shutdown` flips or its sender drops.
    pub async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle();
                }
                _ = shutdown.changed() => {
                    debug!("alert monitor shutting down");
                    break;
                }
            }
        }
    }
}

/// One-line summary, e.g. `RSI - 1m: 45.21 | 5m: 71.02 (overbought) | 15m: waiting`.
pub fn format_status(readings: &[Reading]) -> String {
    let parts: Vec<String> = readings
        .iter()
        .map(|reading| match (reading.value, reading.classification) {
            (None, _) => format!("{}: waiting", reading.timeframe),
            (Some(value), Classification::Normal) => format!("{}: {:.2}", reading.timeframe, value),
            (Some(value), classification) => {
                format!("{}: {:.2} ({})", reading.timeframe, value, classification)
            }
        })
        .collect();

    format!("RSI - {}", parts.join(" | "))
}
