//! Strategy-mode position ledger.
//!
//! At most one open position: `Idle --entry--> InPosition --exit/close_all--> Idle`.
//! An entry in the direction already held is ignored. An entry in the
//! opposite direction reverses: a `flat` exit signal closes the open position
//! and the new entry follows on the same bar. Fills happen at the bar's close.

use std::fmt;

use serde::Serialize;

use crate::domain::error::ExecutionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    /// Parse an entry direction; only `long` and `short` open positions.
    pub fn parse_entry(text: &str) -> Option<Self> {
        match text {
            "long" => Some(Direction::Long),
            "short" => Some(Direction::Short),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
            Direction::Flat => write!(f, "flat"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Entry,
    Exit,
}

impl fmt::Display for SignalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalAction::Entry => write!(f, "entry"),
            SignalAction::Exit => write!(f, "exit"),
        }
    }
}

/// One emitted order intent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub id: String,
    pub direction: Direction,
    pub quantity: f64,
    pub bar_index: usize,
    pub action: SignalAction,
}

#[derive(Debug, Clone, PartialEq)]
struct OpenPosition {
    id: String,
    direction: Direction,
    quantity: f64,
    entry_price: f64,
}

/// Strategy state after the last bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalState {
    pub position: Direction,
    pub quantity: f64,
    pub entry_id: Option<String>,
    pub entry_price: Option<f64>,
    pub realized_pnl: f64,
    pub trades: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Ledger {
    open: Option<OpenPosition>,
    signals: Vec<Signal>,
    realized_pnl: f64,
    trades: usize,
}

fn fill_price(price: f64, bar: usize) -> Result<f64, ExecutionError> {
    if price.is_finite() {
        Ok(price)
    } else {
        Err(ExecutionError::InvalidInput {
            reason: format!("close at bar {bar} is not a finite fill price"),
        })
    }
}

impl Ledger {
    pub fn entry(
        &mut self,
        id: &str,
        direction: &str,
        quantity: f64,
        bar: usize,
        price: f64,
    ) -> Result<(), ExecutionError> {
        let direction = Direction::parse_entry(direction).ok_or_else(|| ExecutionError::InvalidInput {
            reason: format!("entry direction must be \"long\" or \"short\", got \"{direction}\""),
        })?;
        if !(quantity > 0.0 && quantity.is_finite()) {
            return Err(ExecutionError::InvalidInput {
                reason: format!("entry quantity must be positive, got {quantity}"),
            });
        }
        if let Some(open) = &self.open {
            if open.direction == direction {
                return Ok(());
            }
            self.close(bar, price)?;
        }
        let price = fill_price(price, bar)?;
        self.open = Some(OpenPosition {
            id: id.to_string(),
            direction,
            quantity,
            entry_price: price,
        });
        self.signals.push(Signal {
            id: id.to_string(),
            direction,
            quantity,
            bar_index: bar,
            action: SignalAction::Entry,
        });
        Ok(())
    }

    /// Close the open position if it was opened under `id`.
    pub fn exit(&mut self, id: &str, bar: usize, price: f64) -> Result<(), ExecutionError> {
        match &self.open {
            Some(open) if open.id == id => self.close(bar, price),
            _ => Ok(()),
        }
    }

    pub fn close_all(&mut self, bar: usize, price: f64) -> Result<(), ExecutionError> {
        if self.open.is_some() {
            self.close(bar, price)?;
        }
        Ok(())
    }

    fn close(&mut self, bar: usize, price: f64) -> Result<(), ExecutionError> {
        let price = fill_price(price, bar)?;
        let Some(open) = self.open.take() else {
            return Ok(());
        };
        let pnl = match open.direction {
            Direction::Long => (price - open.entry_price) * open.quantity,
            Direction::Short => (open.entry_price - price) * open.quantity,
            Direction::Flat => 0.0,
        };
        self.realized_pnl += pnl;
        self.trades += 1;
        self.signals.push(Signal {
            id: open.id,
            direction: Direction::Flat,
            quantity: open.quantity,
            bar_index: bar,
            action: SignalAction::Exit,
        });
        Ok(())
    }

    /// Signed size: positive long, negative short, zero when idle.
    pub fn position_size(&self) -> f64 {
        match &self.open {
            Some(open) if open.direction == Direction::Short => -open.quantity,
            Some(open) => open.quantity,
            None => 0.0,
        }
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn finish(self) -> (Vec<Signal>, FinalState) {
        let state = FinalState {
            position: self.open.as_ref().map_or(Direction::Flat, |o| o.direction),
            quantity: self.open.as_ref().map_or(0.0, |o| o.quantity),
            entry_id: self.open.as_ref().map(|o| o.id.clone()),
            entry_price: self.open.as_ref().map(|o| o.entry_price),
            realized_pnl: self.realized_pnl,
            trades: self.trades,
        };
        (self.signals, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::ErrorCode;

    #[test]
    fn long_round_trip() {
        let mut ledger = Ledger::default();
        ledger.entry("L", "long", 2.0, 1, 10.0).unwrap();
        assert_eq!(ledger.position_size(), 2.0);
        ledger.exit("L", 3, 15.0).unwrap();
        assert_eq!(ledger.position_size(), 0.0);
        let (signals, state) = ledger.finish();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[1].direction, Direction::Flat);
        assert_eq!(signals[1].action, SignalAction::Exit);
        assert_eq!(signals[1].bar_index, 3);
        assert!((state.realized_pnl - 10.0).abs() < f64::EPSILON);
        assert_eq!(state.trades, 1);
        assert_eq!(state.position, Direction::Flat);
    }

    #[test]
    fn short_pnl_is_inverted() {
        let mut ledger = Ledger::default();
        ledger.entry("S", "short", 1.0, 0, 20.0).unwrap();
        assert_eq!(ledger.position_size(), -1.0);
        ledger.close_all(1, 15.0).unwrap();
        assert!((ledger.realized_pnl() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn same_direction_entry_is_ignored() {
        let mut ledger = Ledger::default();
        ledger.entry("A", "long", 1.0, 0, 10.0).unwrap();
        ledger.entry("B", "long", 5.0, 1, 11.0).unwrap();
        let (signals, state) = ledger.finish();
        assert_eq!(signals.len(), 1);
        assert_eq!(state.entry_id.as_deref(), Some("A"));
        assert_eq!(state.quantity, 1.0);
    }

    #[test]
    fn opposite_entry_reverses() {
        let mut ledger = Ledger::default();
        ledger.entry("L", "long", 1.0, 0, 10.0).unwrap();
        ledger.entry("S", "short", 2.0, 2, 12.0).unwrap();
        let (signals, state) = ledger.finish();
        let actions: Vec<_> = signals.iter().map(|s| (s.id.as_str(), s.direction, s.bar_index)).collect();
        assert_eq!(
            actions,
            vec![
                ("L", Direction::Long, 0),
                ("L", Direction::Flat, 2),
                ("S", Direction::Short, 2),
            ]
        );
        assert_eq!(state.position, Direction::Short);
        assert_eq!(state.entry_price, Some(12.0));
        assert!((state.realized_pnl - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn exit_requires_matching_id() {
        let mut ledger = Ledger::default();
        ledger.exit("X", 0, 1.0).unwrap();
        ledger.entry("L", "long", 1.0, 0, 10.0).unwrap();
        ledger.exit("other", 1, 11.0).unwrap();
        let (signals, state) = ledger.finish();
        assert_eq!(signals.len(), 1);
        assert_eq!(state.entry_id.as_deref(), Some("L"));
    }

    #[test]
    fn invalid_entries_are_rejected() {
        let mut ledger = Ledger::default();
        let err = ledger.entry("L", "sideways", 1.0, 0, 1.0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        let err = ledger.entry("L", "long", 0.0, 0, 1.0).unwrap_err();
        assert!(err.to_string().contains("positive"));
        let err = ledger.entry("L", "long", 1.0, 4, f64::NAN).unwrap_err();
        assert!(err.to_string().contains("bar 4"));
    }
}
