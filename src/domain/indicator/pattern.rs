//! Boolean pattern detectors.
//!
//! Crossovers compare the current and previous bar and are `false` at bar 0.
//! Any comparison involving NaN is `false`.

/// `a` moves from at-or-below `b` to above it.
pub fn crossover(a: &[f64], b: &[f64]) -> Vec<bool> {
    let len = a.len().min(b.len());
    (0..len)
        .map(|i| i >= 1 && a[i] > b[i] && a[i - 1] <= b[i - 1])
        .collect()
}

/// `a` moves from at-or-above `b` to below it.
pub fn crossunder(a: &[f64], b: &[f64]) -> Vec<bool> {
    let len = a.len().min(b.len());
    (0..len)
        .map(|i| i >= 1 && a[i] < b[i] && a[i - 1] >= b[i - 1])
        .collect()
}

/// Strictly increasing over each of the last `period` bars.
pub fn rising(source: &[f64], period: usize) -> Vec<bool> {
    (0..source.len())
        .map(|i| period > 0 && i >= period && (i + 1 - period..=i).all(|j| source[j] > source[j - 1]))
        .collect()
}

/// Strictly decreasing over each of the last `period` bars.
pub fn falling(source: &[f64], period: usize) -> Vec<bool> {
    (0..source.len())
        .map(|i| period > 0 && i >= period && (i + 1 - period..=i).all(|j| source[j] < source[j - 1]))
        .collect()
}

/// Body no larger than a tenth of the bar's range.
pub fn doji(open: &[f64], high: &[f64], low: &[f64], close: &[f64]) -> Vec<bool> {
    let len = open.len().min(high.len()).min(low.len()).min(close.len());
    (0..len)
        .map(|i| (close[i] - open[i]).abs() <= 0.1 * (high[i] - low[i]))
        .collect()
}

/// Up bar whose body engulfs the previous down bar's body.
pub fn bullish_engulfing(open: &[f64], close: &[f64]) -> Vec<bool> {
    let len = open.len().min(close.len());
    (0..len)
        .map(|i| {
            i >= 1
                && close[i - 1] < open[i - 1]
                && close[i] > open[i]
                && open[i] <= close[i - 1]
                && close[i] >= open[i - 1]
        })
        .collect()
}

/// Down bar whose body engulfs the previous up bar's body.
pub fn bearish_engulfing(open: &[f64], close: &[f64]) -> Vec<bool> {
    let len = open.len().min(close.len());
    (0..len)
        .map(|i| {
            i >= 1
                && close[i - 1] > open[i - 1]
                && close[i] < open[i]
                && open[i] >= close[i - 1]
                && close[i] <= open[i - 1]
        })
        .collect()
}
