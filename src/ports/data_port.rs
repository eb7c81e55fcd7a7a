//! Input data port trait.

use crate::domain::error::QuantscriptError;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::series::SeriesTable;

pub trait DataPort {
    /// Load OHLCV bars in ascending date order.
    fn load_bars(&self, source: &str) -> Result<Vec<OhlcvBar>, QuantscriptError>;

    /// Load every numeric column of `source` as an aligned table.
    fn load_series(&self, source: &str) -> Result<SeriesTable, QuantscriptError>;
}
