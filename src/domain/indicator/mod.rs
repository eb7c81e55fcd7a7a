//! Indicator kernels over aligned `f64` series.
//!
//! Every kernel returns a vector as long as its input. Positions before the
//! warm-up window completes are `NaN`, and a `NaN` inside a window makes that
//! window's result `NaN`. Recursive smoothers (EMA, RSI) start after any
//! leading `NaN`s so they can be chained onto other indicators.

pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod obv;
pub mod pattern;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod stddev;
pub mod stochastic;
pub mod window;
pub mod wma;

pub use atr::atr;
pub use bollinger::{BollingerBands, bollinger};
pub use ema::ema;
pub use macd::{MacdLines, macd};
pub use obv::obv;
pub use roc::roc;
pub use rsi::rsi;
pub use sma::sma;
pub use stddev::stddev;
pub use stochastic::{StochasticLines, stochastic};
pub use wma::wma;

/// Index of the first non-NaN value, or `source.len()` when there is none.
pub(crate) fn first_valid(source: &[f64]) -> usize {
    source
        .iter()
        .position(|v| !v.is_nan())
        .unwrap_or(source.len())
}

pub(crate) fn nan_series(len: usize) -> Vec<f64> {
    vec![f64::NAN; len]
}
