//! Simple Moving Average.
//!
//! SMA(n)[i] = mean(P[i-n+1..=i]). Warmup: first (n-1) bars are NaN.

use super::nan_series;
use super::window::sliding_moments;

pub fn sma(source: &[f64], period: usize) -> Vec<f64> {
    let mut values = nan_series(source.len());
    sliding_moments(source, period, |i, window, moments| {
        values[i] = moments.mean(window);
    });
    values
}
