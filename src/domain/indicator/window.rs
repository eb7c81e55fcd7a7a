//! Trailing-window machinery and lagged differences.
//!
//! Sliding statistics are updated as each bar enters and leaves the window,
//! so every kernel here costs O(1) amortised per bar regardless of period.

use std::collections::VecDeque;

use super::nan_series;

/// Mean and sum of squared deviations of the finite values in a window.
/// NaNs and infinities are counted but never enter the running figures.
#[derive(Debug, Default)]
pub(super) struct Moments {
    count: usize,
    mean: f64,
    m2: f64,
    nan: usize,
    infinite: usize,
}

impl Moments {
    /// Two-pass figures for a whole window.
    fn exact(window: &[f64]) -> Self {
        let mut moments = Moments::default();
        let mut sum = 0.0;
        for &v in window {
            if v.is_nan() {
                moments.nan += 1;
            } else if v.is_infinite() {
                moments.infinite += 1;
            } else {
                moments.count += 1;
                sum += v;
            }
        }
        if moments.count > 0 {
            moments.mean = sum / moments.count as f64;
            moments.m2 = window
                .iter()
                .filter(|v| v.is_finite())
                .map(|v| (v - moments.mean) * (v - moments.mean))
                .sum();
        }
        moments
    }

    fn add(&mut self, v: f64) {
        if v.is_nan() {
            self.nan += 1;
        } else if v.is_infinite() {
            self.infinite += 1;
        } else {
            self.count += 1;
            let delta = v - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (v - self.mean);
        }
    }

    fn remove(&mut self, v: f64) {
        if v.is_nan() {
            self.nan -= 1;
        } else if v.is_infinite() {
            self.infinite -= 1;
        } else if self.count <= 1 {
            *self = Moments {
                nan: self.nan,
                infinite: self.infinite,
                ..Moments::default()
            };
        } else {
            let delta = v - self.mean;
            self.count -= 1;
            self.mean -= delta / self.count as f64;
            self.m2 = (self.m2 - delta * (v - self.mean)).max(0.0);
        }
    }

    /// Arithmetic mean of `window`; NaN when it holds a NaN.
    pub(super) fn mean(&self, window: &[f64]) -> f64 {
        if self.nan > 0 {
            f64::NAN
        } else if self.infinite > 0 {
            window.iter().sum::<f64>() / window.len() as f64
        } else {
            self.mean
        }
    }

    /// Population variance; NaN when the window holds any non-finite value.
    pub(super) fn variance(&self) -> f64 {
        if self.nan + self.infinite > 0 || self.count == 0 {
            f64::NAN
        } else {
            (self.m2 / self.count as f64).max(0.0)
        }
    }
}

/// Call `emit(i, window, moments)` for every complete trailing window.
pub(super) fn sliding_moments(
    source: &[f64],
    period: usize,
    mut emit: impl FnMut(usize, &[f64], &Moments),
) {
    if period == 0 {
        return;
    }
    let mut moments = Moments::default();
    for i in 0..source.len() {
        if i >= period {
            moments.remove(source[i - period]);
        }
        moments.add(source[i]);
        if i + 1 < period {
            continue;
        }
        let start = i + 1 - period;
        let window = &source[start..=i];
        // rebuilt once per period so update rounding stays bounded
        if start % period == 0 {
            moments = Moments::exact(window);
        }
        emit(i, window, &moments);
    }
}

/// Monotonic-deque extreme: `prefer(a, b)` is true when `a` should displace `b`.
fn rolling_extreme(source: &[f64], period: usize, prefer: fn(f64, f64) -> bool) -> Vec<f64> {
    let mut values = nan_series(source.len());
    if period == 0 {
        return values;
    }
    let mut candidates: VecDeque<usize> = VecDeque::with_capacity(period);
    let mut nan_in_window = 0usize;
    for (i, &v) in source.iter().enumerate() {
        if i >= period && source[i - period].is_nan() {
            nan_in_window -= 1;
        }
        while candidates.front().is_some_and(|&j| j + period <= i) {
            candidates.pop_front();
        }
        if v.is_nan() {
            nan_in_window += 1;
        } else {
            while candidates.back().is_some_and(|&j| prefer(v, source[j])) {
                candidates.pop_back();
            }
            candidates.push_back(i);
        }
        if i + 1 >= period && nan_in_window == 0 {
            if let Some(&best) = candidates.front() {
                values[i] = source[best];
            }
        }
    }
    values
}

/// Highest value over the trailing `period` bars.
pub fn highest(source: &[f64], period: usize) -> Vec<f64> {
    rolling_extreme(source, period, |a, b| a >= b)
}

/// Lowest value over the trailing `period` bars.
pub fn lowest(source: &[f64], period: usize) -> Vec<f64> {
    rolling_extreme(source, period, |a, b| a <= b)
}

/// Value `lag` bars ago.
pub fn prev(source: &[f64], lag: usize) -> Vec<f64> {
    let mut values = nan_series(source.len());
    for i in lag..source.len() {
        values[i] = source[i - lag];
    }
    values
}

/// Difference from the value `lag` bars ago.
pub fn change(source: &[f64], lag: usize) -> Vec<f64> {
    let mut values = nan_series(source.len());
    for i in lag..source.len() {
        values[i] = source[i] - source[i - lag];
    }
    values
}
