//! Program source and its declared metadata and parameter schema.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::domain::ast::Span;
use crate::domain::types::DomainType;

/// Immutable program text. A new version of a program is a new `ProgramSource`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSource {
    text: Arc<str>,
}

impl ProgramSource {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

impl From<&str> for ProgramSource {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

/// Which entry block the program declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// `@calculate`: produces a derived series or record.
    Indicator,
    /// `@strategy`: emits signals, one evaluation per bar.
    Strategy,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Indicator => f.write_str("indicator"),
            Mode::Strategy => f.write_str("strategy"),
        }
    }
}

/// Contents of the `@metadata` block.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Metadata {
    pub name: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    /// The program's own semantic version.
    pub version: Option<String>,
    /// Stdlib version the program was authored against.
    pub stdlib: Option<String>,
}

pub const METADATA_KEYS: &[&str] = &["name", "category", "description", "version", "stdlib"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Int,
    Float,
    String,
    Bool,
}

impl ParamType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "int" => Some(ParamType::Int),
            "float" => Some(ParamType::Float),
            "string" => Some(ParamType::String),
            "bool" => Some(ParamType::Bool),
            _ => None,
        }
    }

    pub fn domain_type(self) -> DomainType {
        match self {
            ParamType::Int | ParamType::Float => DomainType::Scalar,
            ParamType::String => DomainType::String,
            ParamType::Bool => DomainType::BooleanSeries,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Int => f.write_str("int"),
            ParamType::Float => f.write_str("float"),
            ParamType::String => f.write_str("string"),
            ParamType::Bool => f.write_str("bool"),
        }
    }
}

/// A parameter value, either a declared default or supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Number(f64),
    Str(String),
    Bool(bool),
}

impl ParamValue {
    /// Parse a CLI-style `value` for a parameter of type `ty`.
    pub fn parse_as(ty: ParamType, raw: &str) -> Option<Self> {
        match ty {
            ParamType::Int | ParamType::Float => raw.trim().parse::<f64>().ok().map(ParamValue::Number),
            ParamType::String => Some(ParamValue::Str(raw.to_string())),
            ParamType::Bool => match raw.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(ParamValue::Bool(true)),
                "false" | "no" | "0" => Some(ParamValue::Bool(false)),
                _ => None,
            },
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Number(v) => write!(f, "{}", v),
            ParamValue::Str(s) => write!(f, "\"{}\"", s),
            ParamValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// One declaration from the `@params` block.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamDecl {
    pub name: String,
    pub ty: ParamType,
    pub default: Option<ParamValue>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(skip)]
    pub span: Span,
}

impl ParamDecl {
    /// Check a value against the declared type and bounds.
    pub fn check(&self, value: &ParamValue) -> Result<(), String> {
        match (self.ty, value) {
            (ParamType::Int, ParamValue::Number(v)) if v.fract() != 0.0 || !v.is_finite() => {
                return Err(format!("expected an integer, got {}", v));
            }
            (ParamType::Int | ParamType::Float, ParamValue::Number(v)) => {
                if let Some(min) = self.min {
                    if *v < min {
                        return Err(format!("{} is below the minimum {}", v, min));
                    }
                }
                if let Some(max) = self.max {
                    if *v > max {
                        return Err(format!("{} is above the maximum {}", v, max));
                    }
                }
            }
            (ParamType::String, ParamValue::Str(_)) | (ParamType::Bool, ParamValue::Bool(_)) => {}
            (ty, value) => return Err(format!("expected {}, got {}", ty, value)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn period_decl() -> ParamDecl {
        ParamDecl {
            name: "period".into(),
            ty: ParamType::Int,
            default: Some(ParamValue::Number(14.0)),
            min: Some(1.0),
            max: Some(200.0),
            span: Span::default(),
        }
    }

    #[test]
    fn check_accepts_in_range_integer() {
        assert!(period_decl().check(&ParamValue::Number(20.0)).is_ok());
    }

    #[test]
    fn check_rejects_fractional_int() {
        let err = period_decl().check(&ParamValue::Number(2.5)).unwrap_err();
        assert!(err.contains("integer"));
    }

    #[test]
    fn check_enforces_bounds() {
        assert!(period_decl().check(&ParamValue::Number(0.0)).is_err());
        assert!(period_decl().check(&ParamValue::Number(201.0)).is_err());
    }

    #[test]
    fn check_rejects_wrong_type() {
        let err = period_decl()
            .check(&ParamValue::Str("14".into()))
            .unwrap_err();
        assert!(err.contains("expected int"));
    }

    #[test]
    fn parse_as_by_type() {
        assert_eq!(
            ParamValue::parse_as(ParamType::Float, "2.5"),
            Some(ParamValue::Number(2.5))
        );
        assert_eq!(
            ParamValue::parse_as(ParamType::Bool, "yes"),
            Some(ParamValue::Bool(true))
        );
        assert_eq!(ParamValue::parse_as(ParamType::Int, "abc"), None);
    }

    #[test]
    fn param_types_map_to_domain_types() {
        assert_eq!(ParamType::Int.domain_type(), DomainType::Scalar);
        assert_eq!(ParamType::String.domain_type(), DomainType::String);
        assert_eq!(ParamType::Bool.domain_type(), DomainType::BooleanSeries);
    }
}
