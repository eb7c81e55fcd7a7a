//! Average True Range with Wilder smoothing.
//!
//! TR[0] = high - low, TR[i] = true_range(high, low, prev_close).
//! Seed: mean of the first n true ranges; then ATR[i] = (ATR[i-1]*(n-1) + TR[i]) / n.
//! Warmup: first (n-1) bars are NaN.

use super::nan_series;
use crate::domain::ohlcv::true_range;

pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let len = high.len().min(low.len()).min(close.len());
    let mut values = nan_series(len);
    if period == 0 || len < period {
        return values;
    }

    let tr: Vec<f64> = (0..len)
        .map(|i| {
            if i == 0 {
                high[0] - low[0]
            } else {
                true_range(high[i], low[i], close[i - 1])
            }
        })
        .collect();

    let n = period as f64;
    let mut atr = tr[..period].iter().sum::<f64>() / n;
    values[period - 1] = atr;
    for i in period..len {
        atr = (atr * (n - 1.0) + tr[i]) / n;
        values[i] = atr;
    }
    values
}
