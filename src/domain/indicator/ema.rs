//! Exponential Moving Average.
//!
//! k = 2/(n+1), seed with the first SMA, then EMA[i] = P[i]*k + EMA[i-1]*(1-k).
//! Warmup: the (n-1) bars after the first valid input are NaN.

use super::{first_valid, nan_series};

pub fn ema(source: &[f64], period: usize) -> Vec<f64> {
    let mut values = nan_series(source.len());
    if period == 0 {
        return values;
    }
    let start = first_valid(source);
    let seed_end = start.saturating_add(period);
    if seed_end > source.len() {
        return values;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut ema = source[start..seed_end].iter().sum::<f64>() / period as f64;
    values[seed_end - 1] = ema;
    for i in seed_end..source.len() {
        ema = source[i] * k + ema * (1.0 - k);
        values[i] = ema;
    }
    values
}
