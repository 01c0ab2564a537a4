//! Alert delivery.
//!
//! The monitor hands alerts to an [`AlertSink`] which must return immediately. The default
//! sink, [`AlertDispatcher`], queues alerts onto a bounded channel drained by
//! [`run_alert_worker`], so a slow notification never stalls a monitoring cycle.

use crate::{candle::Timeframe, monitor::Classification};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// A threshold crossing for one timeframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alert {
    pub timeframe: Timeframe,
    pub value: f64,
    pub classification: Classification,
}

/// Receiver of alerts. Implementations must not block the caller.
pub trait AlertSink: Send + Sync {
    fn dispatch(&self, alert: Alert);
}

impl<T> AlertSink for Arc<T>
where
    T: AlertSink + ?Sized,
{
    fn dispatch(&self, alert: Alert) {
        (**self).dispatch(alert)
    }
}

/// Alert delivery configuration
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Shell command played per repeat; `None` rings the terminal bell
    pub sound_command: Option<String>,
    /// Number of times the sound is played per alert
    pub repeats: u32,
    /// Pause between repeats
    pub repeat_gap: Duration,
    /// Maximum queued alerts before new ones are dropped
    pub buffer_size: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            sound_command: None,
            repeats: 3,
            repeat_gap: Duration::from_millis(300),
            buffer_size: 64,
        }
    }
}

/// Non-blocking [`AlertSink`] backed by a bounded channel.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<Alert>,
}

impl AlertDispatcher {
    /// Create a dispatcher and the receiver to hand to [`run_alert_worker`].
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        (Self { tx }, rx)
    }
}

impl AlertSink for AlertDispatcher {
    fn dispatch(&self, alert: Alert) {
        match self.tx.try_send(alert) {
            Ok(()) => {}
            Err(TrySendError::Full(alert)) => {
                warn!(
                    timeframe = %alert.timeframe,
                    value = alert.value,
                    "alert queue full, dropping alert"
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!("alert worker stopped, dropping alert");
            }
        }
    }
}

/// Deliver queued alerts until every [`AlertDispatcher`] has been dropped.
pub async fn run_alert_worker(mut rx: mpsc::Receiver<Alert>, config: AlertConfig) {
    while let Some(alert) = rx.recv().await {
        notify(&alert, &config).await;
    }
    debug!("alert worker finished");
}

async fn notify(alert: &Alert, config: &AlertConfig) {
    warn!(
        timeframe = %alert.timeframe,
        value = alert.value,
        classification = %alert.classification,
        "RSI alert"
    );

    for repeat in 0..config.repeats {
        if repeat > 0 {
            tokio::time::sleep(config.repeat_gap).await;
        }

        match &config.sound_command {
            Some(command) => {
                let status = tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .status()
                    .await;
                if let Err(e) = status {
                    warn!(%command, error = %e, "failed to play alert sound");
                    break;
                }
            }
            None => eprint!("\x07"),
        }
    }
}
