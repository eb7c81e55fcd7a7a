//! End-to-end compile and execute tests.
//!
//! Tests cover:
//! - Indicator-mode scenarios over small close series
//! - Error taxonomy (phase, code, location) for each compile phase
//! - Nesting limits on arbitrarily long expression chains
//! - Fluent and positional call styles producing identical results
//! - Record outputs, parameters and input validation

mod common;

use common::*;
use quantscript::domain::compiler::compile;
use quantscript::domain::engine::{ExecutionLimits, ExecutionResult};
use quantscript::domain::error::{ErrorCode, ExecutionError, Phase};
use quantscript::domain::source::ParamValue;
use quantscript::domain::types::{DomainType, RecordKind};

fn same_output(a: &ExecutionResult, b: &ExecutionResult) -> bool {
    // NaN warm-up values serialize as null on both sides
    serde_json::to_value(a).unwrap() == serde_json::to_value(b).unwrap()
}

mod indicator_mode {
    use super::*;

    #[test]
    fn sma_over_five_closes() {
        let result = run(
            "@calculate\n  return indicator.sma.close(3)",
            closes(&[1.0, 2.0, 3.0, 4.0, 5.0]),
        )
        .unwrap();
        assert_series_eq(result.series().unwrap(), &[f64::NAN, f64::NAN, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn arithmetic_broadcasts_scalars() {
        let result = run(
            "@calculate\n  spread = close - sma(close, 2)\n  return spread * 2 + 1\n",
            closes(&[2.0, 4.0, 6.0]),
        )
        .unwrap();
        assert_series_eq(result.series().unwrap(), &[f64::NAN, 3.0, 3.0]);
    }

    #[test]
    fn conditional_expression_selects_per_bar() {
        let result = run(
            "@calculate\n  return close if close > 2 else 0 - close\n",
            closes(&[1.0, 3.0, 2.0, 5.0]),
        )
        .unwrap();
        assert_series_eq(result.series().unwrap(), &[-1.0, 3.0, -2.0, 5.0]);
    }

    #[test]
    fn nz_replaces_warmup() {
        let result = run(
            "@calculate\n  return nz(sma(close, 2), -1)\n",
            closes(&[1.0, 3.0]),
        )
        .unwrap();
        assert_series_eq(result.series().unwrap(), &[-1.0, 2.0]);
    }

    #[test]
    fn macd_record_and_field_access() {
        let table = sample_table(60);
        let record = run("@calculate\n  return macd(close, 12, 26, 9)\n", table.clone()).unwrap();
        let histogram = run(
            "@calculate\n  m = macd(close, 12, 26, 9)\n  return m.histogram\n",
            table,
        )
        .unwrap();
        assert_series_eq(histogram.series().unwrap(), record.field("histogram").unwrap());

        let macd = record.field("macd").unwrap();
        let signal = record.field("signal").unwrap();
        let hist = record.field("histogram").unwrap();
        for i in 40..60 {
            approx::assert_relative_eq!(hist[i], macd[i] - signal[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn loops_accumulate() {
        let result = run(
            "@calculate\n  total = close * 0\n  for i in range(1, 4):\n    total = total + prev(close, i)\n  return total / 3\n",
            closes(&[3.0, 6.0, 9.0, 12.0]),
        )
        .unwrap();
        assert_series_eq(result.series().unwrap(), &[f64::NAN, f64::NAN, f64::NAN, 6.0]);
    }

    #[test]
    fn rsi_stays_in_range() {
        let result = run("@calculate\n  return indicator.rsi.close(14)\n", sample_table(80)).unwrap();
        let series = result.series().unwrap();
        assert!(series[..14].iter().all(|v| v.is_nan()));
        assert!(series[14..].iter().all(|v| (0.0..=100.0).contains(v)));
    }
}

mod compile_errors {
    use super::*;

    #[test]
    fn undefined_call_is_located_at_the_name() {
        let err = compile("@calculate\n  return foo(close)\n", "1.1").unwrap_err();
        assert_eq!(err.code, ErrorCode::UndefinedName);
        assert_eq!(err.phase, Phase::Parse);
        assert_eq!(err.line(), 2);
        assert_eq!(err.column(), 10);
        assert!(err.message.contains("foo"));
    }

    #[test]
    fn series_plus_string_names_both_types() {
        let err = compile("@calculate\n  return close + \"x\"\n", "1.1").unwrap_err();
        assert_eq!(err.phase, Phase::Type);
        assert_eq!(err.code, ErrorCode::OperandMismatch);
        assert!(err.message.contains("Series"));
        assert!(err.message.contains("String"));
    }

    #[test]
    fn string_param_is_not_numeric() {
        let err = compile(
            "@params\n  label: string = \"a\"\n@calculate\n  return close * label\n",
            "1.1",
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::OperandMismatch);
    }

    #[test]
    fn security_violations_never_reach_type_checking() {
        for source in [
            "@calculate\n  import os\n  return close\n",
            "@calculate\n  return close.__class__\n",
            "@calculate\n  return eval(\"close\")\n",
            "@calculate\n  return os.system(close)\n",
            "@calculate\n  return sma(close, 3)(1)\n",
        ] {
            let err = compile(source, "1.1").unwrap_err();
            assert_eq!(err.phase, Phase::Security, "{source}");
        }
    }

    #[test]
    fn unknown_record_field_is_a_type_error() {
        let err = compile("@calculate\n  return bollinger(close).histogram\n", "1.1").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownField);
        assert_eq!(err.phase, Phase::Type);
    }

    #[test]
    fn strategy_actions_rejected_in_calculate() {
        let err = compile(
            "@calculate\n  strategy.close_all()\n  return close\n",
            "1.1",
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::StrategyOnly);
    }

    #[test]
    fn lexer_errors_carry_position() {
        let err = compile("@calculate\n  return close $ 2\n", "1.1").unwrap_err();
        assert_eq!(err.phase, Phase::Lex);
        assert_eq!((err.line(), err.column()), (2, 16));
    }

    #[test]
    fn unsupported_stdlib_version() {
        let err = compile("@calculate\n  return close\n", "2.0").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedVersion);
    }

    #[test]
    fn report_is_serializable() {
        let err = compile("@calculate\n  return foo(close)\n", "1.1").unwrap_err();
        let json = serde_json::to_value(err.report()).unwrap();
        assert_eq!(json["code"], "undefined_name");
        assert_eq!(json["phase"], "parse");
        assert_eq!(json["line"], 2);
        assert_eq!(json["column"], 10);
    }

    #[test]
    fn context_rendering_points_at_column() {
        let source = "@calculate\n  return foo(close)\n";
        let err = compile(source, "1.1").unwrap_err();
        let rendered = err.display_with_context(source);
        assert!(rendered.contains("return foo(close)"));
        assert!(rendered.contains("         ^"));
    }
}

mod nesting_limits {
    use super::*;
    use quantscript::domain::error::CompileError;
    use std::thread;

    const TERMS: usize = 150_000;

    /// Compile on a thread with a small fixed stack so that any recursion
    /// proportional to the source length would abort the test binary.
    fn compile_on_small_stack(source: String) -> Result<(), CompileError> {
        thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || compile(&source, "1.1").map(|_| ()))
            .unwrap()
            .join()
            .unwrap()
    }

    fn assert_too_deep(body: String) {
        let err = compile_on_small_stack(format!("@calculate\n  return {}\n", body)).unwrap_err();
        assert_eq!(err.code, ErrorCode::NestingTooDeep);
        assert_eq!(err.phase, Phase::Parse);
        assert_eq!(err.line(), 2);
    }

    #[test]
    fn long_additive_chain_is_rejected() {
        assert_too_deep(vec!["close"; TERMS].join("+"));
    }

    #[test]
    fn long_boolean_chain_is_rejected() {
        assert_too_deep(vec!["close > 1"; TERMS].join(" and "));
    }

    #[test]
    fn long_member_chain_is_rejected() {
        assert_too_deep(format!("close{}", ".a".repeat(TERMS)));
    }

    #[test]
    fn long_call_chain_is_rejected() {
        assert_too_deep(format!("close{}", "()".repeat(TERMS)));
    }

    #[test]
    fn many_short_statements_are_fine() {
        let mut source = String::from("@calculate\n  x = close\n");
        for _ in 0..10_000 {
            source.push_str("  x = x + close\n");
        }
        source.push_str("  return x\n");
        assert!(compile_on_small_stack(source).is_ok());
    }
}

mod fluent_binding {
    use super::*;

    fn assert_equivalent(fluent: &str, positional: &str) {
        let table = sample_table(60);
        let a = run(fluent, table.clone()).unwrap();
        let b = run(positional, table).unwrap();
        assert!(same_output(&a, &b), "{fluent} != {positional}");
        assert_eq!(compiled(fluent).output, compiled(positional).output);
    }

    #[test]
    fn single_source_indicators() {
        for name in ["sma", "ema", "wma", "rsi", "roc", "stddev", "highest", "lowest"] {
            assert_equivalent(
                &format!("@calculate\n  return indicator.{name}.high(5)\n"),
                &format!("@calculate\n  return {name}(high, 5)\n"),
            );
        }
    }

    #[test]
    fn ohlc_indicators() {
        assert_equivalent(
            "@calculate\n  return indicator.atr(14)\n",
            "@calculate\n  return atr(high, low, close, 14)\n",
        );
        assert_equivalent(
            "@calculate\n  return indicator.stochastic(14, 3)\n",
            "@calculate\n  return stochastic(high, low, close, 14, 3)\n",
        );
        assert_equivalent(
            "@calculate\n  return indicator.obv()\n",
            "@calculate\n  return obv(close, volume)\n",
        );
    }

    #[test]
    fn input_columns() {
        assert_equivalent(
            "@calculate\n  return input.open - input.close\n",
            "@calculate\n  return open - close\n",
        );
    }

    #[test]
    fn record_defaults() {
        assert_equivalent(
            "@calculate\n  return indicator.bollinger.close()\n",
            "@calculate\n  return bollinger(close, 20, 2)\n",
        );
        assert_eq!(
            compiled("@calculate\n  return indicator.macd.close()\n").output,
            DomainType::ResultRecord(RecordKind::Macd)
        );
    }
}

mod parameters {
    use super::*;

    const SOURCE: &str = "@params\n  n: int = 2 (min = 1, max = 50)\n  scale: float = 1\n@calculate\n  return sma(close, n) * scale\n";

    #[test]
    fn defaults_and_overrides() {
        let table = closes(&[2.0, 4.0, 6.0, 8.0]);
        let result = run_with(SOURCE, table.clone(), &[], ExecutionLimits::default()).unwrap();
        assert_series_eq(result.series().unwrap(), &[f64::NAN, 3.0, 5.0, 7.0]);

        let result = run_with(
            SOURCE,
            table,
            &[("n", ParamValue::Number(4.0)), ("scale", ParamValue::Number(0.5))],
            ExecutionLimits::default(),
        )
        .unwrap();
        assert_series_eq(result.series().unwrap(), &[f64::NAN, f64::NAN, f64::NAN, 2.5]);
    }

    #[test]
    fn out_of_range_and_wrong_type_rejected() {
        let table = closes(&[1.0]);
        for value in [ParamValue::Number(0.0), ParamValue::Number(51.0), ParamValue::Str("2".into())] {
            let err = run_with(SOURCE, table.clone(), &[("n", value)], ExecutionLimits::default())
                .unwrap_err();
            assert!(matches!(err, ExecutionError::InvalidParam { ref name, .. } if name == "n"));
        }
    }

    #[test]
    fn fractional_period_is_invalid_input() {
        let err = run_with(
            "@params\n  n: float = 2\n@calculate\n  return sma(close, n)\n",
            closes(&[1.0, 2.0]),
            &[("n", ParamValue::Number(2.5))],
            ExecutionLimits::default(),
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }
}

mod input_validation {
    use super::*;

    #[test]
    fn missing_column() {
        let err = run("@calculate\n  return indicator.atr(3)\n", closes(&[1.0, 2.0])).unwrap_err();
        assert!(matches!(err, ExecutionError::MissingColumn { .. }));
        assert_eq!(err.report().phase, Phase::Execute);
    }

    #[test]
    fn empty_input_yields_empty_series() {
        let result = run("@calculate\n  return sma(close, 3)\n", closes(&[])).unwrap();
        assert!(result.series().unwrap().is_empty());
    }
}
