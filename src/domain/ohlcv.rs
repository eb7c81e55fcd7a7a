//! OHLCV bar representation.

use chrono::NaiveDate;

/// One daily bar as loaded from a data source.
#[derive(Debug, Clone, PartialEq)]
pub struct OhlcvBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl OhlcvBar {
    /// Reject bars whose prices cannot describe a real trading range.
    pub fn check(&self) -> Result<(), String> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(format!("{}: prices must be finite", self.date));
        }
        if self.high < self.low {
            return Err(format!("{}: high {} is below low {}", self.date, self.high, self.low));
        }
        if self.open > self.high || self.open < self.low || self.close > self.high || self.close < self.low {
            return Err(format!("{}: open and close must lie within [low, high]", self.date));
        }
        if self.volume < 0.0 {
            return Err(format!("{}: negative volume {}", self.date, self.volume));
        }
        Ok(())
    }
}

/// max(high - low, |high - prev_close|, |low - prev_close|)
pub fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    let hl = high - low;
    let hc = (high - prev_close).abs();
    let lc = (low - prev_close).abs();
    hl.max(hc).max(lc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> OhlcvBar {
        OhlcvBar {
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            open,
            high,
            low,
            close,
            volume: 50_000.0,
        }
    }

    #[test]
    fn true_range_picks_widest_span() {
        // high-low=20 dominates
        assert!((true_range(110.0, 90.0, 100.0) - 20.0).abs() < f64::EPSILON);
        // gap up: |110-70|=40
        assert!((true_range(110.0, 90.0, 70.0) - 40.0).abs() < f64::EPSILON);
        // gap down: |90-130|=40
        assert!((true_range(110.0, 90.0, 130.0) - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn check_accepts_consistent_bar() {
        assert!(bar(100.0, 110.0, 90.0, 105.0).check().is_ok());
    }

    #[test]
    fn check_rejects_inverted_range() {
        let err = bar(100.0, 90.0, 110.0, 100.0).check().unwrap_err();
        assert!(err.contains("below low"));
    }

    #[test]
    fn check_rejects_close_outside_range() {
        assert!(bar(100.0, 110.0, 90.0, 120.0).check().is_err());
        assert!(bar(100.0, 110.0, f64::NAN, 100.0).check().is_err());
    }

    #[test]
    fn check_rejects_negative_volume() {
        let mut b = bar(100.0, 110.0, 90.0, 105.0);
        b.volume = -1.0;
        assert!(b.check().is_err());
    }
}
