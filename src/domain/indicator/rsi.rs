//! RSI (Relative Strength Index).
//!
//! Uses Wilder's smoothing for average gain/loss:
//! - First average: simple mean of gains/losses over the first n changes
//! - Subsequent: avg = (prev_avg * (n-1) + current) / n
//!
//! RSI = 100 - (100 / (1 + avg_gain / avg_loss)); if avg_loss == 0, RSI = 100.
//! Warmup: the first n bars are NaN.

use super::{first_valid, nan_series};

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - (100.0 / (1.0 + avg_gain / avg_loss))
    }
}

fn split_change(change: f64) -> (f64, f64) {
    if change > 0.0 {
        (change, 0.0)
    } else {
        (0.0, -change)
    }
}

pub fn rsi(source: &[f64], period: usize) -> Vec<f64> {
    let mut values = nan_series(source.len());
    if period == 0 {
        return values;
    }
    let start = first_valid(source);
    let seed = start.saturating_add(period);
    if seed >= source.len() {
        return values;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in start + 1..=seed {
        let (gain, loss) = split_change(source[i] - source[i - 1]);
        avg_gain += gain;
        avg_loss += loss;
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    values[seed] = rsi_value(avg_gain, avg_loss);

    let n = period as f64;
    for i in seed + 1..source.len() {
        let (gain, loss) = split_change(source[i] - source[i - 1]);
        avg_gain = (avg_gain * (n - 1.0) + gain) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss) / n;
        values[i] = rsi_value(avg_gain, avg_loss);
    }
    values
}
