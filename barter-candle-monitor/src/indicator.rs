//! Relative Strength Index with Wilder-style exponential smoothing.
//!
//! Stateless: every call recomputes from the closes it is given, so retroactive corrections
//! to the underlying series are always reflected.

/// Default RSI look-back window.
pub const DEFAULT_RSI_WINDOW: usize = 14;

/// RSI calculator for a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rsi {
    window: usize,
}

impl Default for Rsi {
    fn default() -> Self {
        Self::new(DEFAULT_RSI_WINDOW)
    }
}

impl Rsi {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    /// Latest RSI value over `closes`, rounded to 2 decimal places.
    ///
    /// Returns `None` (insufficient data) when fewer than `window` closes are available.
    pub fn compute(&self, closes: &[f64]) -> Option<f64> {
        rsi(closes, self.window)
    }
}

/// Latest RSI value of `closes` (oldest first) for `window`, rounded to 2 decimal places.
///
/// Average gain and loss are exponentially smoothed with `alpha = 1 / window`, both starting
/// from zero, over every consecutive change. Zero average loss yields 100, which includes a
/// series with no movement at all.
pub fn rsi(closes: &[f64], window: usize) -> Option<f64> {
    if window < 2 || closes.len() < window {
        return None;
    }

    let alpha = 1.0 / window as f64;
    let (avg_gain, avg_loss) = closes.windows(2).map(|w| w[1] - w[0]).fold(
        (0.0_f64, 0.0_f64),
        |(gain, loss), change| {
            (
                gain + alpha * (change.max(0.0) - gain),
                loss + alpha * ((-change).max(0.0) - loss),
            )
        },
    );

    let value = if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    };

    Some(round2(value.clamp(0.0, 100.0)))
}

/// Round to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
