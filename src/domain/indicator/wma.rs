//! Weighted Moving Average.
//!
//! WMA(n) = (1*P[i-n+1] + 2*P[i-n+2] + ... + n*P[i]) / (n*(n+1)/2)
//! Warmup: first (n-1) bars are NaN.

use super::nan_series;

pub fn wma(source: &[f64], period: usize) -> Vec<f64> {
    let mut values = nan_series(source.len());
    if period == 0 {
        return values;
    }
    let n = period as f64;
    let divisor = n * (n + 1.0) / 2.0;
    for i in period - 1..source.len() {
        let window = &source[i + 1 - period..=i];
        let weighted: f64 = window
            .iter()
            .enumerate()
            .map(|(j, v)| (j + 1) as f64 * v)
            .sum();
        values[i] = weighted / divisor;
    }
    values
}
