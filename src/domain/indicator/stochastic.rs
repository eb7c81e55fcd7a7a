//! Stochastic oscillator.
//!
//! %K[i] = 100 * (close - lowest_low(k)) / (highest_high(k) - lowest_low(k)),
//! or 50 when the range is zero. %D = SMA(d) of %K.
//! Warmup: %K is NaN for the first (k-1) bars, %D for a further (d-1).

use super::sma;
use super::window::{highest, lowest};

#[derive(Debug, Clone, PartialEq)]
pub struct StochasticLines {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    k_period: usize,
    d_period: usize,
) -> StochasticLines {
    let hh = highest(high, k_period);
    let ll = lowest(low, k_period);
    let k: Vec<f64> = close
        .iter()
        .zip(hh.iter().zip(&ll))
        .map(|(c, (h, l))| {
            let range = h - l;
            if range.is_nan() {
                f64::NAN
            } else if range == 0.0 {
                50.0
            } else {
                100.0 * (c - l) / range
            }
        })
        .collect();
    let d = sma(&k, d_period);
    StochasticLines { k, d }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn stochastic_position_in_range() {
        let high = [10.0, 12.0, 14.0, 16.0];
        let low = [8.0, 9.0, 10.0, 11.0];
        let close = [9.0, 11.0, 13.0, 12.0];
        let lines = stochastic(&high, &low, &close, 2, 2);
        assert!(lines.k[0].is_nan());
        // window 0..=1: hh=12, ll=8 → 100*(11-8)/4
        assert_relative_eq!(lines.k[1], 75.0);
        assert!(lines.d[1].is_nan());
        // k[2]: hh=14, ll=9 → 80
        assert_relative_eq!(lines.k[2], 80.0);
        assert_relative_eq!(lines.d[2], 77.5);
    }

    #[test]
    fn flat_range_is_midpoint() {
        let lines = stochastic(&[5.0; 3], &[5.0; 3], &[5.0; 3], 2, 1);
        assert_relative_eq!(lines.k[2], 50.0);
    }
}
