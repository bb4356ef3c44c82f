//! Price bars and the bounded per-instrument bar window

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Default number of bars kept per instrument
pub const DEFAULT_WINDOW_CAPACITY: usize = 5_000;

/// One completed price bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub spread: f64,
}

impl Bar {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Position of the close inside the bar range: 0 = at low, 1 = at high
    pub fn close_location(&self) -> f64 {
        let range = self.range();
        if range <= 0.0 {
            return 0.5;
        }
        (self.close - self.low) / range
    }

    /// True range against the previous close
    pub fn true_range(&self, prev_close: f64) -> f64 {
        self.range()
            .max((self.high - prev_close).abs())
            .max((self.low - prev_close).abs())
    }

    /// Reject bars that would poison downstream arithmetic
    pub fn validate(&self) -> CoreResult<()> {
        let fields = [self.open, self.high, self.low, self.close, self.volume, self.spread];
        if fields.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::NonFiniteBar {
                timestamp: self.timestamp.to_rfc3339(),
            });
        }
        if self.close <= 0.0 {
            return Err(CoreError::InvalidInput { field: "close", value: self.close });
        }
        if self.high < self.low {
            return Err(CoreError::InvalidInput { field: "high", value: self.high });
        }
        Ok(())
    }
}

/// Bounded, time-ordered window of bars for one instrument
#[derive(Debug, Clone)]
pub struct BarWindow {
    bars: Vec<Bar>,
    capacity: usize,
}

impl BarWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            bars: Vec::with_capacity(capacity.min(DEFAULT_WINDOW_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Append a bar, dropping the oldest bars beyond capacity.
    ///
    /// A bar with the same timestamp as the newest one replaces it (the feed
    /// re-sent a corrected bar); an older bar is an error.
    pub fn push(&mut self, bar: Bar) -> CoreResult<()> {
        bar.validate()?;

        if let Some(last) = self.bars.last() {
            if bar.timestamp == last.timestamp {
                let idx = self.bars.len() - 1;
                self.bars[idx] = bar;
                return Ok(());
            }
            if bar.timestamp < last.timestamp {
                return Err(CoreError::OutOfOrder {
                    previous: last.timestamp.to_rfc3339(),
                    current: bar.timestamp.to_rfc3339(),
                });
            }
        }

        self.bars.push(bar);
        if self.bars.len() > self.capacity {
            let excess = self.bars.len() - self.capacity;
            self.bars.drain(..excess);
        }
        Ok(())
    }

    pub fn as_slice(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn clear(&mut self) {
        self.bars.clear();
    }
}

impl Default for BarWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bar_at(minute: i64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap() + Duration::minutes(minute),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            spread: 0.1,
        }
    }

    #[test]
    fn test_window_drops_oldest() {
        let mut window = BarWindow::new(3);
        for i in 0..5 {
            window.push(bar_at(i, 100.0 + i as f64)).unwrap();
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.as_slice()[0].close, 102.0);
        assert_eq!(window.last().unwrap().close, 104.0);
    }

    #[test]
    fn test_window_replaces_same_timestamp() {
        let mut window = BarWindow::new(10);
        window.push(bar_at(0, 100.0)).unwrap();
        window.push(bar_at(0, 101.0)).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window.last().unwrap().close, 101.0);
    }

    #[test]
    fn test_window_rejects_out_of_order_and_bad_bars() {
        let mut window = BarWindow::new(10);
        window.push(bar_at(5, 100.0)).unwrap();
        assert!(matches!(window.push(bar_at(1, 100.0)), Err(CoreError::OutOfOrder { .. })));

        let mut bad = bar_at(6, 100.0);
        bad.high = f64::NAN;
        assert!(matches!(window.push(bad), Err(CoreError::NonFiniteBar { .. })));
    }

    #[test]
    fn test_candle_geometry() {
        let bar = Bar {
            timestamp: Utc::now(),
            open: 10.0,
            high: 12.0,
            low: 6.0,
            close: 11.0,
            volume: 1.0,
            spread: 0.0,
        };
        assert!(bar.is_bullish());
        assert_eq!(bar.body(), 1.0);
        assert_eq!(bar.upper_wick(), 1.0);
        assert_eq!(bar.lower_wick(), 4.0);
        assert!((bar.close_location() - 5.0 / 6.0).abs() < 1e-12);
        assert_eq!(bar.true_range(14.0), 8.0);
    }
}
