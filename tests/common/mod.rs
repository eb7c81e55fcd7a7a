#![allow(dead_code)]

use chrono::NaiveDate;
pub use quantscript::domain::ohlcv::OhlcvBar;
use quantscript::domain::compiler::{ValidatedProgram, compile};
use quantscript::domain::engine::{ExecutionLimits, ExecutionResult, execute};
use quantscript::domain::error::{CacheStoreError, ExecutionError};
use quantscript::domain::compiler::CacheKey;
use quantscript::domain::series::SeriesTable;
use quantscript::domain::source::ParamValue;
use quantscript::ports::cache_port::CachePort;
use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn make_bar(date: &str, open: f64, high: f64, low: f64, close: f64) -> OhlcvBar {
    OhlcvBar {
        date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        open,
        high,
        low,
        close,
        volume: 1000.0,
    }
}

/// Table with only a `close` column.
pub fn closes(values: &[f64]) -> Arc<SeriesTable> {
    Arc::new(
        SeriesTable::new()
            .with_column("close", values.to_vec())
            .unwrap(),
    )
}

/// Deterministic OHLCV bars oscillating around 100.
pub fn sample_bars(n: usize) -> Vec<OhlcvBar> {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    (0..n)
        .map(|i| {
            let t = i as f64;
            let close = 100.0 + 10.0 * (t / 5.0).sin() + t * 0.1;
            let open = close - (t / 3.0).cos();
            OhlcvBar {
                date: start + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1000.0 + (i % 7) as f64 * 100.0,
            }
        })
        .collect()
}

pub fn sample_table(n: usize) -> Arc<SeriesTable> {
    Arc::new(SeriesTable::from_bars(&sample_bars(n)))
}

pub fn compiled(source: &str) -> Arc<ValidatedProgram> {
    Arc::new(compile(source, "1.1").unwrap_or_else(|e| panic!("{}", e.display_with_context(source))))
}

pub fn run(source: &str, input: Arc<SeriesTable>) -> Result<ExecutionResult, ExecutionError> {
    execute(compiled(source), input, HashMap::new(), ExecutionLimits::default())
}

pub fn run_with(
    source: &str,
    input: Arc<SeriesTable>,
    params: &[(&str, ParamValue)],
    limits: ExecutionLimits,
) -> Result<ExecutionResult, ExecutionError> {
    let params = params
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    execute(compiled(source), input, params, limits)
}

/// Compare series treating NaN as equal to NaN.
pub fn assert_series_eq(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        if e.is_nan() {
            assert!(a.is_nan(), "index {}: expected NaN, got {}", i, a);
        } else {
            approx::assert_relative_eq!(*a, *e, epsilon = 1e-9);
        }
    }
}

pub fn write_temp(content: &str, suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// In-memory store counting reads and writes, optionally failing every call.
#[derive(Default)]
pub struct CountingStore {
    pub entries: Mutex<HashMap<CacheKey, Arc<ValidatedProgram>>>,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub failing: bool,
}

impl CountingStore {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }
}

impl CachePort for CountingStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Arc<ValidatedProgram>>, CacheStoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(CacheStoreError {
                reason: "backing store unavailable".into(),
            });
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn put(
        &self,
        key: CacheKey,
        value: Arc<ValidatedProgram>,
        _ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(CacheStoreError {
                reason: "backing store unavailable".into(),
            });
        }
        self.entries.lock().unwrap().insert(key, value);
        Ok(())
    }
}

/// Lets a test keep a handle on a store after handing it to a cache.
pub struct Shared<T>(pub Arc<T>);

impl<T: CachePort> CachePort for Shared<T> {
    fn get(&self, key: &CacheKey) -> Result<Option<Arc<ValidatedProgram>>, CacheStoreError> {
        self.0.get(key)
    }

    fn put(
        &self,
        key: CacheKey,
        value: Arc<ValidatedProgram>,
        ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        self.0.put(key, value, ttl)
    }
}
