//! Columnar time-series input.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::domain::error::ExecutionError;
use crate::domain::ohlcv::OhlcvBar;

/// Named, equal-length `f64` columns aligned to one bar index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SeriesTable {
    len: usize,
    columns: BTreeMap<String, Arc<[f64]>>,
    dates: Option<Vec<NaiveDate>>,
}

impl SeriesTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from columns; every column must have the same length.
    pub fn from_columns<I, S>(columns: I) -> Result<Self, ExecutionError>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for (name, values) in columns {
            table = table.with_column(name, values)?;
        }
        Ok(table)
    }

    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<Self, ExecutionError> {
        let name = name.into();
        if !self.columns.is_empty() && values.len() != self.len {
            return Err(ExecutionError::InvalidInput {
                reason: format!(
                    "column '{}' has {} rows, expected {}",
                    name,
                    values.len(),
                    self.len
                ),
            });
        }
        self.len = values.len();
        self.columns.insert(name, values.into());
        Ok(self)
    }

    /// Attach one date per bar.
    pub fn with_dates(mut self, dates: Vec<NaiveDate>) -> Result<Self, ExecutionError> {
        if dates.len() != self.len {
            return Err(ExecutionError::InvalidInput {
                reason: format!("{} dates for {} rows", dates.len(), self.len),
            });
        }
        self.dates = Some(dates);
        Ok(self)
    }

    pub fn from_bars(bars: &[OhlcvBar]) -> Self {
        let pick = |f: fn(&OhlcvBar) -> f64| -> Arc<[f64]> { bars.iter().map(f).collect() };
        let mut columns = BTreeMap::new();
        columns.insert("open".to_string(), pick(|b| b.open));
        columns.insert("high".to_string(), pick(|b| b.high));
        columns.insert("low".to_string(), pick(|b| b.low));
        columns.insert("close".to_string(), pick(|b| b.close));
        columns.insert("volume".to_string(), pick(|b| b.volume));
        Self {
            len: bars.len(),
            columns,
            dates: Some(bars.iter().map(|b| b.date).collect()),
        }
    }

    /// Number of bars.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn column(&self, name: &str) -> Option<&Arc<[f64]>> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn dates(&self) -> Option<&[NaiveDate]> {
        self.dates.as_deref()
    }
}
