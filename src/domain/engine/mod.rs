//! Execution engine: runs a [`ValidatedProgram`] over a [`SeriesTable`].
//!
//! Each call to [`execute`] builds its own context (parameter bindings,
//! strategy ledger, budget) and evaluates on a watchdog-supervised thread.
//! Nothing is shared between executions except the immutable program and
//! input table.

mod budget;
mod builtins;
mod eval;
mod strategy;
mod value;
mod watchdog;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::domain::compiler::ValidatedProgram;
use crate::domain::error::ExecutionError;
use crate::domain::series::SeriesTable;
use crate::domain::source::ParamValue;
use crate::domain::types::RecordKind;

use budget::Budget;
use eval::Evaluator;

pub use strategy::{Direction, FinalState, Signal, SignalAction};
pub use value::Value;

pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(2000);
pub const DEFAULT_MEMORY_CEILING: usize = 256 * 1024 * 1024;

/// Resource limits for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub deadline: Duration,
    /// Bytes of series data the evaluation may materialize.
    pub memory_ceiling: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            memory_ceiling: DEFAULT_MEMORY_CEILING,
        }
    }
}

/// Output of an `@calculate` program.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorOutput {
    Series(Vec<f64>),
    Record {
        kind: RecordKind,
        fields: Vec<(String, Vec<f64>)>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExecutionResult {
    Indicator {
        output: IndicatorOutput,
    },
    Strategy {
        signals: Vec<Signal>,
        final_state: FinalState,
    },
}

impl ExecutionResult {
    /// The output series of an indicator that returns a plain series.
    pub fn series(&self) -> Option<&[f64]> {
        match self {
            ExecutionResult::Indicator {
                output: IndicatorOutput::Series(values),
            } => Some(values),
            _ => None,
        }
    }

    /// One field of an indicator that returns a record.
    pub fn field(&self, name: &str) -> Option<&[f64]> {
        match self {
            ExecutionResult::Indicator {
                output: IndicatorOutput::Record { fields, .. },
            } => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, values)| values.as_slice()),
            _ => None,
        }
    }

    /// Signals emitted by a strategy, empty for indicators.
    pub fn signals(&self) -> &[Signal] {
        match self {
            ExecutionResult::Strategy { signals, .. } => signals,
            ExecutionResult::Indicator { .. } => &[],
        }
    }

    pub fn final_state(&self) -> Option<&FinalState> {
        match self {
            ExecutionResult::Strategy { final_state, .. } => Some(final_state),
            ExecutionResult::Indicator { .. } => None,
        }
    }
}

/// Resolve caller-supplied parameters against the declared schema.
fn bind_params(
    program: &ValidatedProgram,
    supplied: HashMap<String, ParamValue>,
) -> Result<HashMap<String, Value>, ExecutionError> {
    let mut supplied: BTreeMap<String, ParamValue> = supplied.into_iter().collect();
    if let Some(unknown) = supplied.keys().find(|name| program.param(name).is_none()) {
        return Err(ExecutionError::InvalidParam {
            name: unknown.clone(),
            reason: "not declared in @params".to_string(),
        });
    }

    let mut bound = HashMap::with_capacity(program.params.len());
    for decl in &program.params {
        let value = supplied
            .remove(&decl.name)
            .or_else(|| decl.default.clone())
            .ok_or_else(|| ExecutionError::InvalidParam {
                name: decl.name.clone(),
                reason: "no value supplied and no default declared".to_string(),
            })?;
        decl.check(&value)
            .map_err(|reason| ExecutionError::InvalidParam {
                name: decl.name.clone(),
                reason,
            })?;
        let value = match value {
            ParamValue::Number(v) => Value::Scalar(v),
            ParamValue::Str(s) => Value::Str(s.into()),
            ParamValue::Bool(b) => Value::Flag(b),
        };
        bound.insert(decl.name.clone(), value);
    }
    Ok(bound)
}

/// Execute a validated program over `input` under `limits`.
///
/// Parameters and required columns are checked before any evaluation
/// starts. A deadline breach returns [`ExecutionError::ResourceExceeded`]
/// and no partial output.
pub fn execute(
    program: Arc<ValidatedProgram>,
    input: Arc<SeriesTable>,
    params: HashMap<String, ParamValue>,
    limits: ExecutionLimits,
) -> Result<ExecutionResult, ExecutionError> {
    let params = bind_params(&program, params)?;
    if let Some(column) = program.columns.iter().find(|c| input.column(c).is_none()) {
        return Err(ExecutionError::MissingColumn {
            column: column.clone(),
        });
    }

    let started = Instant::now();
    let cancel = Arc::new(AtomicBool::new(false));
    let worker_cancel = Arc::clone(&cancel);
    let worker_program = Arc::clone(&program);
    let worker_input = Arc::clone(&input);
    let result = watchdog::run_with_deadline(limits.deadline, cancel, move || {
        let budget = Budget::new(limits.deadline, limits.memory_ceiling, worker_cancel);
        Evaluator::new(&worker_program, &worker_input, params, budget)?.run()
    })?;

    info!(
        key = %program.key,
        mode = %program.mode,
        bars = input.len(),
        signals = result.signals().len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "execution finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::compiler::compile;
    use crate::domain::error::ErrorCode;

    fn closes(values: &[f64]) -> Arc<SeriesTable> {
        Arc::new(SeriesTable::new().with_column("close", values.to_vec()).unwrap())
    }

    fn run(source: &str, input: Arc<SeriesTable>) -> Result<ExecutionResult, ExecutionError> {
        let program = Arc::new(compile(source, "1.1").unwrap());
        execute(program, input, HashMap::new(), ExecutionLimits::default())
    }

    #[test]
    fn sma_scenario() {
        let result = run(
            "@calculate\n  return indicator.sma.close(3)\n",
            closes(&[1.0, 2.0, 3.0, 4.0, 5.0]),
        )
        .unwrap();
        let series = result.series().unwrap();
        assert!(series[0].is_nan() && series[1].is_nan());
        assert_eq!(&series[2..], &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn strategy_entry_scenario() {
        let source = "@strategy\n  if input.close > indicator.sma.close(2):\n    strategy.entry(\"L\", strategy.long)\n";
        let result = run(source, closes(&[1.0, 3.0, 2.0, 5.0])).unwrap();
        let signals = result.signals();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].bar_index, 1);
        assert_eq!(signals[0].direction, Direction::Long);
        assert_eq!(signals[0].action, SignalAction::Entry);
        let state = result.final_state().unwrap();
        assert_eq!(state.entry_price, Some(3.0));
    }

    #[test]
    fn record_output_lists_fields_in_order() {
        let result = run(
            "@calculate\n  return indicator.bollinger.close(2)\n",
            closes(&[1.0, 3.0, 5.0]),
        )
        .unwrap();
        assert_eq!(result.field("middle").unwrap()[1], 2.0);
        assert_eq!(result.field("upper").unwrap()[1], 4.0);
        assert!(result.field("signal").is_none());
    }

    #[test]
    fn params_bind_with_defaults_and_overrides() {
        let source = "@params\n  n: int = 2 (min = 1, max = 10)\n@calculate\n  return sma(close, n)\n";
        let program = Arc::new(compile(source, "1.1").unwrap());
        let input = closes(&[2.0, 4.0, 6.0]);

        let result = execute(program.clone(), input.clone(), HashMap::new(), ExecutionLimits::default()).unwrap();
        assert_eq!(result.series().unwrap()[1], 3.0);

        let params = HashMap::from([("n".to_string(), ParamValue::Number(3.0))]);
        let result = execute(program.clone(), input.clone(), params, ExecutionLimits::default()).unwrap();
        assert!(result.series().unwrap()[1].is_nan());
        assert_eq!(result.series().unwrap()[2], 4.0);

        let params = HashMap::from([("n".to_string(), ParamValue::Number(11.0))]);
        let err = execute(program.clone(), input.clone(), params, ExecutionLimits::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParam);

        let params = HashMap::from([("m".to_string(), ParamValue::Number(1.0))]);
        let err = execute(program, input, params, ExecutionLimits::default()).unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidParam { ref name, .. } if name == "m"));
    }

    #[test]
    fn missing_required_param() {
        let source = "@params\n  label: string\n@calculate\n  return close\n";
        let err = run(source, closes(&[1.0])).unwrap_err();
        assert!(err.to_string().contains("label"));
    }

    #[test]
    fn missing_column_is_reported_before_evaluation() {
        let err = run("@calculate\n  return indicator.sma.high(2)\n", closes(&[1.0, 2.0])).unwrap_err();
        assert_eq!(
            err,
            ExecutionError::MissingColumn {
                column: "high".into()
            }
        );
    }

    #[test]
    fn zero_deadline_returns_no_partial_output() {
        let source = "@strategy\n  strategy.entry(\"L\", strategy.long)\n";
        let program = Arc::new(compile(source, "1.1").unwrap());
        let limits = ExecutionLimits {
            deadline: Duration::ZERO,
            ..ExecutionLimits::default()
        };
        let err = execute(program, closes(&[1.0; 10]), HashMap::new(), limits).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DeadlineExceeded);
    }

    #[test]
    fn memory_ceiling_is_enforced() {
        let program = Arc::new(compile("@calculate\n  return close * 2\n", "1.1").unwrap());
        let limits = ExecutionLimits {
            memory_ceiling: 64,
            ..ExecutionLimits::default()
        };
        let err = execute(program, closes(&[1.0; 100]), HashMap::new(), limits).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MemoryExceeded);
    }

    #[test]
    fn result_serializes_with_mode_tag() {
        let result = run("@calculate\n  return close\n", closes(&[1.0])).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["mode"], "indicator");
        assert_eq!(json["output"]["series"][0], 1.0);
    }
}
