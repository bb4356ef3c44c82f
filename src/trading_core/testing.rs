//! Deterministic bar fixtures shared by the unit tests

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::bars::Bar;

/// Timestamp of the i-th M15 bar from Monday 2025-03-03 00:00 UTC
pub fn ts(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap() + Duration::minutes(15 * i as i64)
}

/// Bars through the given closes. Each bar opens halfway between the previous
/// close and its own close; wicks extend `range / 2` beyond the body.
pub fn bars_from_closes(closes: &[f64], range: f64) -> Vec<Bar> {
    let stamps: Vec<DateTime<Utc>> = (0..closes.len()).map(ts).collect();
    bars_with_timestamps(closes, &stamps, range)
}

pub fn bars_with_timestamps(closes: &[f64], stamps: &[DateTime<Utc>], range: f64) -> Vec<Bar> {
    let mut prev = closes.first().copied().unwrap_or(0.0);
    closes
        .iter()
        .zip(stamps)
        .map(|(&close, &timestamp)| {
            let open = (prev + close) / 2.0;
            prev = close;
            Bar {
                timestamp,
                open,
                high: open.max(close) + range / 2.0,
                low: open.min(close) - range / 2.0,
                close,
                volume: 1_000.0,
                spread: 0.0001 * close,
            }
        })
        .collect()
}

/// Straight line of closes, wick size equal to the step
pub fn linear_bars(n: usize, start: f64, step: f64) -> Vec<Bar> {
    let closes: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
    bars_from_closes(&closes, step.abs())
}

/// Small linear congruential generator; uniform in [-1, 1)
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_unit(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    }
}

/// Explicit OHLC bar at position `i`
pub fn bar(i: usize, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: ts(i),
        open,
        high,
        low,
        close,
        volume: 1_000.0,
        spread: 0.0001 * close,
    }
}

/// Multi-bar market shapes used by the detector and pipeline tests
pub mod scenario {
    use super::{bar, bars_from_closes};
    use crate::trading_core::bars::Bar;
    use crate::trading_core::indicators;

    /// Stair-step uptrend: six bars up 0.30, three down 0.30, ending on the
    /// top of an up run (196 bars, last swing low 6 bars back)
    fn stair_uptrend() -> Vec<f64> {
        let mut closes = Vec::new();
        let mut price = 100.0;
        for i in 0..1 + 9 * 21 + 6 {
            if i > 0 {
                price += if (i - 1) % 9 < 6 { 0.3 } else { -0.3 };
            }
            closes.push(price);
        }
        closes
    }

    /// Uptrend, then a 10-bar pullback to 45% of the last leg. The final bar
    /// is a hammer, or with `hammer = false` a bearish bar that makes a new
    /// pullback low and closes in its lower half.
    pub fn uptrend_pullback(hammer: bool) -> Vec<Bar> {
        let mut closes = stair_uptrend();
        let trend = bars_from_closes(&closes, 0.2);
        let top = trend[trend.len() - 1].high;
        let origin = indicators::lowest_low(&trend[trend.len() - 10..]);
        let target = top - 0.45 * (top - origin);

        let last = closes[closes.len() - 1];
        for i in 0..9 {
            closes.push(last + (target - last) * (i + 1) as f64 / 10.0);
        }
        let prev = closes[closes.len() - 1];
        let mut bars = bars_from_closes(&closes, 0.2);
        let i = bars.len();
        if hammer {
            bars.push(bar(i, target - 0.04, target + 0.01, target - 0.6, target));
        } else {
            bars.push(bar(i, prev, prev + 0.02, target - 0.08, target));
        }
        bars
    }

    /// Triangle-wave range (0.04 per bar, 10-bar legs) ending near a trough,
    /// then one wide bar closing 0.03 above the range high. Returns the bars
    /// and the range high that was broken.
    pub fn ranging_breakout() -> (Vec<Bar>, f64) {
        let mut closes = Vec::new();
        let mut price = 100.0;
        for i in 0..80usize {
            if i > 0 {
                price += if ((i - 1) / 10) % 2 == 0 { 0.04 } else { -0.04 };
            }
            closes.push(price);
        }
        let mut bars = bars_from_closes(&closes, 0.05);
        let level = indicators::highest_high(&bars[bars.len() - 25..]);
        let open = closes[closes.len() - 1];
        let close = level + 0.03;
        bars.push(bar(80, open, close + 0.01, open - 0.01, close));
        (bars, level)
    }
}
