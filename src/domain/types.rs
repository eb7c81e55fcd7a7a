//! Domain type system: price series, boolean series, scalars and records.

use serde::Serialize;
use std::fmt;

/// Shapes of multi-valued indicator results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Macd,
    Bollinger,
    Stochastic,
}

impl RecordKind {
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            RecordKind::Macd => &["macd", "signal", "histogram"],
            RecordKind::Bollinger => &["upper", "middle", "lower"],
            RecordKind::Stochastic => &["k", "d"],
        }
    }

    pub fn field_index(self, field: &str) -> Option<usize> {
        self.fields().iter().position(|f| *f == field)
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordKind::Macd => "MacdResult",
            RecordKind::Bollinger => "BollingerResult",
            RecordKind::Stochastic => "StochasticResult",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum DomainType {
    Scalar,
    Series,
    BooleanSeries,
    String,
    Void,
    ResultRecord(RecordKind),
}

impl DomainType {
    /// Scalar or Series: accepted by arithmetic and comparison operators.
    pub fn is_numeric(self) -> bool {
        matches!(self, DomainType::Scalar | DomainType::Series)
    }
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainType::Scalar => f.write_str("Scalar"),
            DomainType::Series => f.write_str("Series"),
            DomainType::BooleanSeries => f.write_str("BooleanSeries"),
            DomainType::String => f.write_str("String"),
            DomainType::Void => f.write_str("Void"),
            DomainType::ResultRecord(kind) => write!(f, "ResultRecord<{}>", kind.name()),
        }
    }
}
