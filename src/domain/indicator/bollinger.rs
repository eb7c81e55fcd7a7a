//! Bollinger Bands.
//!
//! - Middle: SMA over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! StdDev is the population standard deviation. Warmup: first (n-1) bars are NaN.

use super::{sma, stddev};

pub const DEFAULT_PERIOD: usize = 20;
pub const DEFAULT_MULT: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub upper: Vec<f64>,
    pub middle: Vec<f64>,
    pub lower: Vec<f64>,
}

pub fn bollinger(source: &[f64], period: usize, mult: f64) -> BollingerBands {
    let middle = sma(source, period);
    let deviation = stddev(source, period);
    let upper = middle
        .iter()
        .zip(&deviation)
        .map(|(m, d)| m + mult * d)
        .collect();
    let lower = middle
        .iter()
        .zip(&deviation)
        .map(|(m, d)| m - mult * d)
        .collect();
    BollingerBands {
        upper,
        middle,
        lower,
    }
}
