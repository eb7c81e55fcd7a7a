//! Strategy-mode execution tests: signal emission, position policy and
//! final state.

mod common;

use common::*;
use quantscript::domain::engine::{Direction, SignalAction};
use quantscript::domain::error::ErrorCode;

#[test]
fn entry_when_close_crosses_above_sma() {
    let source = "@strategy\n  if input.close > indicator.sma.close(2):\n    strategy.entry(\"L\", strategy.long)";
    let result = run(source, closes(&[1.0, 3.0, 2.0, 5.0])).unwrap();

    let signals = result.signals();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].id, "L");
    assert_eq!(signals[0].bar_index, 1);
    assert_eq!(signals[0].direction, Direction::Long);
    assert_eq!(signals[0].action, SignalAction::Entry);
    assert!((signals[0].quantity - 1.0).abs() < f64::EPSILON);

    let state = result.final_state().unwrap();
    assert_eq!(state.position, Direction::Long);
    assert_eq!(state.entry_id.as_deref(), Some("L"));
    assert_eq!(state.entry_price, Some(3.0));
    assert_eq!(state.trades, 0);
}

#[test]
fn same_direction_entry_is_ignored() {
    let result = run(
        "@strategy\n  strategy.entry(\"L\", strategy.long, 2)\n",
        closes(&[1.0, 2.0, 3.0]),
    )
    .unwrap();
    assert_eq!(result.signals().len(), 1);
    assert!((result.final_state().unwrap().quantity - 2.0).abs() < f64::EPSILON);
}

#[test]
fn opposite_entry_reverses_on_the_same_bar() {
    let source = "@strategy\n  if bar_index() == 1:\n    strategy.entry(\"L\", strategy.long)\n  elif bar_index() == 3:\n    strategy.entry(\"S\", strategy.short)\n";
    let result = run(source, closes(&[10.0, 11.0, 12.0, 15.0, 14.0])).unwrap();

    let signals = result.signals();
    assert_eq!(signals.len(), 3);
    assert_eq!(
        (signals[1].action, signals[1].direction, signals[1].bar_index, signals[1].id.as_str()),
        (SignalAction::Exit, Direction::Flat, 3, "L")
    );
    assert_eq!(
        (signals[2].action, signals[2].direction, signals[2].bar_index),
        (SignalAction::Entry, Direction::Short, 3)
    );

    let state = result.final_state().unwrap();
    assert_eq!(state.position, Direction::Short);
    assert_eq!(state.trades, 1);
    assert!((state.realized_pnl - 4.0).abs() < f64::EPSILON);
}

#[test]
fn exit_requires_matching_id() {
    let source = "@strategy\n  if bar_index() == 0:\n    strategy.entry(\"L\", strategy.long)\n  if bar_index() == 1:\n    strategy.exit(\"other\")\n  if bar_index() == 2:\n    strategy.exit(\"L\")\n";
    let result = run(source, closes(&[5.0, 6.0, 8.0, 9.0])).unwrap();
    let signals = result.signals();
    assert_eq!(signals.len(), 2);
    assert_eq!(signals[1].bar_index, 2);
    let state = result.final_state().unwrap();
    assert_eq!(state.position, Direction::Flat);
    assert!((state.realized_pnl - 3.0).abs() < f64::EPSILON);
}

#[test]
fn exit_while_idle_is_a_no_op() {
    let result = run(
        "@strategy\n  strategy.exit(\"L\")\n  strategy.close_all()\n",
        closes(&[1.0, 2.0]),
    )
    .unwrap();
    assert!(result.signals().is_empty());
    assert_eq!(result.final_state().unwrap().position, Direction::Flat);
}

#[test]
fn state_accessors_thread_across_bars() {
    // enter on bar 0, close once the position shows a profit
    let source = "@strategy\n  if market.position == 0 and market.bar_index == 0:\n    strategy.entry(\"L\", strategy.long)\n  if market.position > 0 and close > 12:\n    strategy.close_all()\n";
    let result = run(source, closes(&[10.0, 11.0, 13.0, 9.0])).unwrap();
    let signals = result.signals();
    assert_eq!(signals.len(), 2);
    assert_eq!(signals[1].bar_index, 2);
    let state = result.final_state().unwrap();
    assert!((state.realized_pnl - 3.0).abs() < f64::EPSILON);
    assert_eq!(state.trades, 1);
}

#[test]
fn locals_do_not_survive_the_bar() {
    // `hits` restarts from zero on every bar, so the entry never fires
    let source = "@strategy\n  hits = 0\n  if close > 0:\n    hits = hits + 1\n  if hits > 1:\n    strategy.entry(\"L\", strategy.long)\n";
    let result = run(source, closes(&[1.0, 2.0, 3.0])).unwrap();
    assert!(result.signals().is_empty());
}

#[test]
fn crossover_pattern_drives_entries() {
    let source = "@strategy\n  fast = indicator.sma.close(2)\n  slow = indicator.sma.close(4)\n  if pattern.crossover(fast, slow):\n    strategy.entry(\"X\", strategy.long)\n  if pattern.crossunder(fast, slow):\n    strategy.entry(\"Y\", strategy.short)\n";
    let result = run(source, closes(&[5.0, 4.0, 3.0, 2.0, 4.0, 6.0, 8.0, 5.0, 2.0, 1.0])).unwrap();
    let entries: Vec<_> = result
        .signals()
        .iter()
        .filter(|s| s.action == SignalAction::Entry)
        .map(|s| (s.id.as_str(), s.bar_index))
        .collect();
    assert_eq!(entries.first(), Some(&("X", 5)));
    assert!(entries.iter().any(|(id, _)| *id == "Y"));
}

#[test]
fn invalid_direction_is_rejected() {
    let err = run(
        "@strategy\n  strategy.entry(\"L\", \"sideways\")\n",
        closes(&[1.0]),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
}

#[test]
fn nan_fill_price_is_invalid_input() {
    let err = run(
        "@strategy\n  strategy.entry(\"L\", strategy.long)\n",
        closes(&[f64::NAN, 1.0]),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
}

#[test]
fn signals_serialize_lowercase() {
    let result = run(
        "@strategy\n  strategy.entry(\"L\", strategy.long)\n",
        closes(&[1.0]),
    )
    .unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["mode"], "strategy");
    assert_eq!(json["signals"][0]["direction"], "long");
    assert_eq!(json["signals"][0]["action"], "entry");
    assert_eq!(json["final_state"]["position"], "long");
}
