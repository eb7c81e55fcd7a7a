//! Runtime values.
//!
//! Values mirror [`DomainType`] with one refinement: a boolean that is the
//! same on every bar is held as [`Value::Flag`] rather than a materialized
//! mask, and numeric scalars stay scalars until combined with a series.
//! Columns are shared with the input table through `Arc`.

use std::borrow::Cow;
use std::sync::Arc;

use crate::domain::types::{DomainType, RecordKind};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Series(Arc<[f64]>),
    /// Uniform boolean, broadcast on demand.
    Flag(bool),
    Flags(Arc<[bool]>),
    Str(Arc<str>),
    Record(RecordKind, Arc<[Arc<[f64]>]>),
    Void,
}

impl Value {
    pub fn series(values: Vec<f64>) -> Self {
        Value::Series(values.into())
    }

    pub fn flags(values: Vec<bool>) -> Self {
        Value::Flags(values.into())
    }

    pub fn record(kind: RecordKind, fields: Vec<Vec<f64>>) -> Self {
        Value::Record(kind, fields.into_iter().map(Arc::from).collect())
    }

    /// Domain type this value inhabits.
    pub fn domain_type(&self) -> DomainType {
        match self {
            Value::Scalar(_) => DomainType::Scalar,
            Value::Series(_) => DomainType::Series,
            Value::Flag(_) | Value::Flags(_) => DomainType::BooleanSeries,
            Value::Str(_) => DomainType::String,
            Value::Record(kind, _) => DomainType::ResultRecord(*kind),
            Value::Void => DomainType::Void,
        }
    }

    /// Bytes of series data this value holds.
    pub fn heap_bytes(&self) -> usize {
        match self {
            Value::Series(values) => values.len() * size_of::<f64>(),
            Value::Flags(values) => values.len(),
            Value::Record(_, fields) => fields.iter().map(|f| f.len() * size_of::<f64>()).sum(),
            Value::Str(text) => text.len(),
            Value::Scalar(_) | Value::Flag(_) | Value::Void => 0,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Numeric view aligned to `len` bars; scalars broadcast.
    pub fn numeric(&self, len: usize) -> Option<Cow<'_, [f64]>> {
        match self {
            Value::Scalar(v) => Some(Cow::Owned(vec![*v; len])),
            Value::Series(values) => Some(Cow::Borrowed(values)),
            _ => None,
        }
    }

    /// Boolean view aligned to `len` bars; uniform flags broadcast.
    pub fn mask(&self, len: usize) -> Option<Cow<'_, [bool]>> {
        match self {
            Value::Flag(b) => Some(Cow::Owned(vec![*b; len])),
            Value::Flags(values) => Some(Cow::Borrowed(values)),
            _ => None,
        }
    }

    /// Truth value at one bar.
    pub fn flag_at(&self, bar: usize) -> Option<bool> {
        match self {
            Value::Flag(b) => Some(*b),
            Value::Flags(values) => values.get(bar).copied(),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        match self {
            Value::Record(kind, fields) => kind
                .field_index(name)
                .and_then(|i| fields.get(i))
                .map(|f| Value::Series(f.clone())),
            _ => None,
        }
    }
}
