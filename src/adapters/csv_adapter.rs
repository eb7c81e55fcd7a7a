//! CSV file data adapter.
//!
//! Files carry a header row. Columns are located by name (case-insensitive),
//! so extra columns and any column order are accepted. An optional `date`
//! column in `YYYY-MM-DD` form orders the rows; empty numeric cells read as
//! `NaN`.

use crate::domain::error::QuantscriptError;
use crate::domain::ohlcv::OhlcvBar;
use crate::domain::series::SeriesTable;
use crate::domain::stdlib::COLUMNS;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

/// Parsed file: header names plus rows, sorted by date when dated.
struct Sheet {
    headers: Vec<String>,
    dates: Option<Vec<NaiveDate>>,
    rows: Vec<Vec<f64>>,
}

impl Sheet {
    fn column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = self.headers.iter().position(|h| h == name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }
}

fn data_error(reason: String) -> QuantscriptError {
    QuantscriptError::Data { reason }
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, source: &str) -> PathBuf {
        self.base_path.join(source)
    }

    fn read_sheet(&self, source: &str) -> Result<Sheet, QuantscriptError> {
        let path = self.csv_path(source);
        let content = fs::read_to_string(&path)
            .map_err(|e| data_error(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let header_row = rdr
            .headers()
            .map_err(|e| data_error(format!("CSV parse error: {}", e)))?
            .clone();
        let all: Vec<String> = header_row.iter().map(|h| h.to_lowercase()).collect();
        let date_idx = all.iter().position(|h| h == "date");
        let value_idx: Vec<usize> = (0..all.len()).filter(|i| Some(*i) != date_idx).collect();

        let mut dated: Vec<(Option<NaiveDate>, Vec<f64>)> = Vec::new();
        for (line, result) in rdr.records().enumerate() {
            // header is line 1
            let line = line + 2;
            let record = result.map_err(|e| data_error(format!("CSV parse error: {}", e)))?;

            let date = match date_idx {
                None => None,
                Some(idx) => {
                    let raw = record.get(idx).unwrap_or_default();
                    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
                        data_error(format!("line {}: invalid date '{}': {}", line, raw, e))
                    })?;
                    Some(date)
                }
            };

            let mut values = Vec::with_capacity(value_idx.len());
            for &idx in &value_idx {
                let raw = record.get(idx).unwrap_or_default();
                let value = if raw.is_empty() {
                    f64::NAN
                } else {
                    raw.parse::<f64>().map_err(|e| {
                        data_error(format!(
                            "line {}: invalid {} value '{}': {}",
                            line, all[idx], raw, e
                        ))
                    })?
                };
                values.push(value);
            }
            dated.push((date, values));
        }

        if date_idx.is_some() {
            dated.sort_by_key(|(date, _)| *date);
        }
        let dates = date_idx.map(|_| dated.iter().filter_map(|(d, _)| *d).collect());
        Ok(Sheet {
            headers: value_idx.iter().map(|&i| all[i].clone()).collect(),
            dates,
            rows: dated.into_iter().map(|(_, v)| v).collect(),
        })
    }
}

impl DataPort for CsvAdapter {
    fn load_bars(&self, source: &str) -> Result<Vec<OhlcvBar>, QuantscriptError> {
        let sheet = self.read_sheet(source)?;
        let dates = sheet
            .dates
            .clone()
            .ok_or_else(|| data_error(format!("{}: missing date column", source)))?;
        let mut columns = Vec::with_capacity(COLUMNS.len());
        for &name in COLUMNS {
            let column = sheet
                .column(name)
                .ok_or_else(|| data_error(format!("{}: missing {} column", source, name)))?;
            columns.push(column);
        }

        let mut bars = Vec::with_capacity(dates.len());
        for (i, date) in dates.into_iter().enumerate() {
            let bar = OhlcvBar {
                date,
                open: columns[0][i],
                high: columns[1][i],
                low: columns[2][i],
                close: columns[3][i],
                volume: columns[4][i],
            };
            bar.check()
                .map_err(|reason| data_error(format!("{}: {}", source, reason)))?;
            bars.push(bar);
        }
        Ok(bars)
    }

    fn load_series(&self, source: &str) -> Result<SeriesTable, QuantscriptError> {
        let sheet = self.read_sheet(source)?;
        let mut table = SeriesTable::new();
        for name in &sheet.headers {
            let column = sheet.column(name).unwrap_or_default();
            table = table
                .with_column(name.clone(), column)
                .map_err(|e| data_error(e.to_string()))?;
        }
        if let Some(dates) = sheet.dates {
            if !sheet.headers.is_empty() {
                table = table
                    .with_dates(dates)
                    .map_err(|e| data_error(e.to_string()))?;
            }
        }
        Ok(table)
    }
}
