//! Evaluation rules for the pure stdlib symbols.
//!
//! Actions and state accessors touch the strategy ledger and are handled by
//! the evaluator; everything here is a function of its arguments alone.

use std::borrow::Cow;

use crate::domain::ast::Span;
use crate::domain::error::ExecutionError;
use crate::domain::indicator::{self, pattern, window};
use crate::domain::stdlib::{Builtin, SymbolDef};
use crate::domain::types::RecordKind;

use super::value::Value;

/// Positional arguments with declared defaults filled in.
struct Args<'a> {
    def: &'static SymbolDef,
    values: &'a [Value],
    len: usize,
    span: Span,
}

impl<'a> Args<'a> {
    fn fault(&self, what: &str, index: usize) -> ExecutionError {
        let name = self.def.args.get(index).map_or("?", |a| a.name);
        ExecutionError::fault(
            format!("argument '{}' of {} is not {}", name, self.def.name, what),
            Some(self.span),
        )
    }

    fn default_value(&self, index: usize) -> Option<f64> {
        self.def.args.get(index).and_then(|a| a.default)
    }

    fn series(&self, index: usize) -> Result<Cow<'a, [f64]>, ExecutionError> {
        self.values
            .get(index)
            .and_then(|v| v.numeric(self.len))
            .ok_or_else(|| self.fault("numeric", index))
    }

    fn scalar(&self, index: usize) -> Result<f64, ExecutionError> {
        match self.values.get(index) {
            Some(v) => v.as_scalar().ok_or_else(|| self.fault("a Scalar", index)),
            None => self
                .default_value(index)
                .ok_or_else(|| self.fault("supplied", index)),
        }
    }

    /// A positive integer. Periods past the input length behave like `len + 1`.
    fn period(&self, index: usize) -> Result<usize, ExecutionError> {
        let v = self.scalar(index)?;
        if !(v >= 1.0) || v.fract() != 0.0 {
            let name = self.def.args.get(index).map_or("period", |a| a.name);
            return Err(ExecutionError::InvalidInput {
                reason: format!(
                    "argument '{}' of {} must be a positive integer, got {}",
                    name, self.def.name, v
                ),
            });
        }
        Ok(v.min(self.len as f64 + 1.0) as usize)
    }
}

fn map_numeric(value: &Value, f: impl Fn(f64) -> f64) -> Option<Value> {
    match value {
        Value::Scalar(v) => Some(Value::Scalar(f(*v))),
        Value::Series(values) => Some(Value::series(values.iter().map(|v| f(*v)).collect())),
        _ => None,
    }
}

fn zip_numeric(a: &Value, b: &Value, len: usize, f: impl Fn(f64, f64) -> f64) -> Option<Value> {
    if let (Value::Scalar(x), Value::Scalar(y)) = (a, b) {
        return Some(Value::Scalar(f(*x, *y)));
    }
    let (a, b) = (a.numeric(len)?, b.numeric(len)?);
    Some(Value::series(a.iter().zip(b.iter()).map(|(x, y)| f(*x, *y)).collect()))
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }
}

/// Apply a pure builtin. `len` is the bar count of the input table.
pub(crate) fn apply(
    def: &'static SymbolDef,
    values: &[Value],
    len: usize,
    span: Span,
) -> Result<Value, ExecutionError> {
    let args = Args {
        def,
        values,
        len,
        span,
    };
    let value = match def.builtin {
        Builtin::Sma => Value::series(indicator::sma(&args.series(0)?, args.period(1)?)),
        Builtin::Ema => Value::series(indicator::ema(&args.series(0)?, args.period(1)?)),
        Builtin::Wma => Value::series(indicator::wma(&args.series(0)?, args.period(1)?)),
        Builtin::Rsi => Value::series(indicator::rsi(&args.series(0)?, args.period(1)?)),
        Builtin::Roc => Value::series(indicator::roc(&args.series(0)?, args.period(1)?)),
        Builtin::Stddev => Value::series(indicator::stddev(&args.series(0)?, args.period(1)?)),
        Builtin::Highest => Value::series(window::highest(&args.series(0)?, args.period(1)?)),
        Builtin::Lowest => Value::series(window::lowest(&args.series(0)?, args.period(1)?)),
        Builtin::Change => Value::series(window::change(&args.series(0)?, args.period(1)?)),
        Builtin::Prev => Value::series(window::prev(&args.series(0)?, args.period(1)?)),
        Builtin::Atr => Value::series(indicator::atr(
            &args.series(0)?,
            &args.series(1)?,
            &args.series(2)?,
            args.period(3)?,
        )),
        Builtin::Obv => Value::series(indicator::obv(&args.series(0)?, &args.series(1)?)),
        Builtin::Macd => {
            let lines = indicator::macd(
                &args.series(0)?,
                args.period(1)?,
                args.period(2)?,
                args.period(3)?,
            );
            Value::record(RecordKind::Macd, vec![lines.macd, lines.signal, lines.histogram])
        }
        Builtin::Bollinger => {
            let bands = indicator::bollinger(&args.series(0)?, args.period(1)?, args.scalar(2)?);
            Value::record(RecordKind::Bollinger, vec![bands.upper, bands.middle, bands.lower])
        }
        Builtin::Stochastic => {
            let lines = indicator::stochastic(
                &args.series(0)?,
                &args.series(1)?,
                &args.series(2)?,
                args.period(3)?,
                args.period(4)?,
            );
            Value::record(RecordKind::Stochastic, vec![lines.k, lines.d])
        }
        Builtin::Crossover => Value::flags(pattern::crossover(&args.series(0)?, &args.series(1)?)),
        Builtin::Crossunder => Value::flags(pattern::crossunder(&args.series(0)?, &args.series(1)?)),
        Builtin::Rising => Value::flags(pattern::rising(&args.series(0)?, args.period(1)?)),
        Builtin::Falling => Value::flags(pattern::falling(&args.series(0)?, args.period(1)?)),
        Builtin::Doji => Value::flags(pattern::doji(
            &args.series(0)?,
            &args.series(1)?,
            &args.series(2)?,
            &args.series(3)?,
        )),
        // high and low are part of the candle signature but do not affect engulfing
        Builtin::BullishEngulfing => {
            Value::flags(pattern::bullish_engulfing(&args.series(0)?, &args.series(3)?))
        }
        Builtin::BearishEngulfing => {
            Value::flags(pattern::bearish_engulfing(&args.series(0)?, &args.series(3)?))
        }
        Builtin::Abs => unary(&args, f64::abs)?,
        Builtin::Sqrt => unary(&args, f64::sqrt)?,
        Builtin::Log => unary(&args, f64::ln)?,
        Builtin::Max => binary(&args, nan_max)?,
        Builtin::Min => binary(&args, nan_min)?,
        Builtin::Nz => {
            let fallback = args.scalar(1)?;
            unary(&args, |v| if v.is_nan() { fallback } else { v })?
        }
        Builtin::Entry
        | Builtin::Exit
        | Builtin::CloseAll
        | Builtin::PositionSize
        | Builtin::BarIndex
        | Builtin::RealizedPnl => {
            return Err(ExecutionError::fault(
                format!("{} needs strategy state", def.name),
                Some(span),
            ));
        }
    };
    Ok(value)
}

fn unary(args: &Args<'_>, f: impl Fn(f64) -> f64) -> Result<Value, ExecutionError> {
    args.values
        .first()
        .and_then(|v| map_numeric(v, f))
        .ok_or_else(|| args.fault("numeric", 0))
}

fn binary(args: &Args<'_>, f: fn(f64, f64) -> f64) -> Result<Value, ExecutionError> {
    match (args.values.first(), args.values.get(1)) {
        (Some(a), Some(b)) => zip_numeric(a, b, args.len, f).ok_or_else(|| args.fault("numeric", 0)),
        _ => Err(args.fault("supplied", 1)),
    }
}
