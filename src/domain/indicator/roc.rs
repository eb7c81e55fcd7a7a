//! ROC (Rate of Change).
//!
//! ROC(n)[i] = ((P[i] - P[i-n]) / P[i-n]) * 100; if P[i-n] == 0, ROC = 0.
//! Warmup: first n bars are NaN.

use super::nan_series;

pub fn roc(source: &[f64], period: usize) -> Vec<f64> {
    let mut values = nan_series(source.len());
    if period == 0 {
        return values;
    }
    for i in period..source.len() {
        let prev = source[i - period];
        values[i] = if prev == 0.0 {
            0.0
        } else {
            ((source[i] - prev) / prev) * 100.0
        };
    }
    values
}
