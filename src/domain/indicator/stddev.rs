//! Rolling population standard deviation (divides by N, not N-1).
//! Warmup: first (n-1) bars are NaN.

use super::nan_series;
use super::window::sliding_moments;

pub fn stddev(source: &[f64], period: usize) -> Vec<f64> {
    let mut values = nan_series(source.len());
    sliding_moments(source, period, |i, _, moments| {
        values[i] = moments.variance().sqrt();
    });
    values
}
