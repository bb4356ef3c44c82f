//! Single- and two-bar candlestick patterns

use serde::{Deserialize, Serialize};

use super::bars::Bar;
use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    Hammer,
    ShootingStar,
    BullishEngulfing,
    BearishEngulfing,
    Doji,
    PinBar,
    InsideBar,
    MomentumThrust,
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternKind::Hammer => write!(f, "hammer"),
            PatternKind::ShootingStar => write!(f, "shooting_star"),
            PatternKind::BullishEngulfing => write!(f, "bullish_engulfing"),
            PatternKind::BearishEngulfing => write!(f, "bearish_engulfing"),
            PatternKind::Doji => write!(f, "doji"),
            PatternKind::PinBar => write!(f, "pin_bar"),
            PatternKind::InsideBar => write!(f, "inside_bar"),
            PatternKind::MomentumThrust => write!(f, "momentum_thrust"),
        }
    }
}

/// A detected candle pattern
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandlePattern {
    pub kind: PatternKind,
    pub direction: Direction,
    /// 0..1
    pub strength: f64,
    /// 0..100
    pub confidence: f64,
}

/// Wick / body ratios used by the detectors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CandleConfig {
    /// Hammer: lower wick at least this multiple of the body
    pub wick_body_ratio: f64,
    /// Hammer: lower wick at least this share of the range
    pub wick_range_ratio: f64,
    /// Hammer: opposite wick at most this share of the range
    pub max_opposite_wick: f64,
    /// Doji: body at most this share of the range
    pub doji_body_ratio: f64,
    /// Pin bar: nose wick at least this share of the range
    pub pin_wick_ratio: f64,
    /// Momentum thrust: body at least this share of the range
    pub thrust_body_ratio: f64,
    /// Momentum thrust: range at least this multiple of ATR
    pub thrust_range_atr: f64,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self {
            wick_body_ratio: 2.0,
            wick_range_ratio: 0.55,
            max_opposite_wick: 0.25,
            doji_body_ratio: 0.1,
            pin_wick_ratio: 0.66,
            thrust_body_ratio: 0.7,
            thrust_range_atr: 1.5,
        }
    }
}

/// Hammer (bullish) or shooting star (bearish)
pub fn hammer_like(bar: &Bar, config: &CandleConfig) -> Option<CandlePattern> {
    let range = bar.range();
    if range <= 0.0 {
        return None;
    }
    let body = bar.body();
    let lower = bar.lower_wick();
    let upper = bar.upper_wick();

    if lower >= config.wick_body_ratio * body
        && lower >= config.wick_range_ratio * range
        && upper <= config.max_opposite_wick * range
    {
        let strength = (lower / range).clamp(0.0, 1.0);
        return Some(CandlePattern {
            kind: PatternKind::Hammer,
            direction: Direction::Long,
            strength,
            confidence: 50.0 + 40.0 * strength,
        });
    }

    if upper >= config.wick_body_ratio * body
        && upper >= config.wick_range_ratio * range
        && lower <= config.max_opposite_wick * range
    {
        let strength = (upper / range).clamp(0.0, 1.0);
        return Some(CandlePattern {
            kind: PatternKind::ShootingStar,
            direction: Direction::Short,
            strength,
            confidence: 50.0 + 40.0 * strength,
        });
    }

    None
}

/// Current body engulfs the previous, opposite-colored body
pub fn engulfing(prev: &Bar, bar: &Bar) -> Option<CandlePattern> {
    let prev_body = prev.body();
    let body = bar.body();
    if body <= prev_body || prev_body <= 0.0 {
        return None;
    }
    let strength = (body / prev_body / 3.0).clamp(0.0, 1.0);

    if prev.is_bearish() && bar.is_bullish() && bar.open <= prev.close && bar.close >= prev.open {
        return Some(CandlePattern {
            kind: PatternKind::BullishEngulfing,
            direction: Direction::Long,
            strength,
            confidence: 55.0 + 35.0 * strength,
        });
    }
    if prev.is_bullish() && bar.is_bearish() && bar.open >= prev.close && bar.close <= prev.open {
        return Some(CandlePattern {
            kind: PatternKind::BearishEngulfing,
            direction: Direction::Short,
            strength,
            confidence: 55.0 + 35.0 * strength,
        });
    }
    None
}

/// Near-zero body. Direction is supplied by context since a doji is neutral.
pub fn doji(bar: &Bar, context: Direction, config: &CandleConfig) -> Option<CandlePattern> {
    let range = bar.range();
    if range <= 0.0 || bar.body() > config.doji_body_ratio * range {
        return None;
    }
    Some(CandlePattern {
        kind: PatternKind::Doji,
        direction: context,
        strength: 0.4,
        confidence: 45.0,
    })
}

/// Reversal candle supporting a continuation in `trend`
pub fn reversal_candle(bars: &[Bar], trend: Direction, config: &CandleConfig) -> Option<CandlePattern> {
    let bar = bars.last()?;
    let candidates = [
        hammer_like(bar, config),
        bars.len()
            .checked_sub(2)
            .and_then(|i| engulfing(&bars[i], bar)),
        doji(bar, trend, config),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter(|p| p.direction == trend)
        .max_by(|a, b| a.strength.total_cmp(&b.strength))
}

/// Pin bar: long nose wick with a small body at the opposite end
pub fn pin_bar(bar: &Bar, config: &CandleConfig) -> Option<CandlePattern> {
    let range = bar.range();
    if range <= 0.0 || bar.body() > 0.3 * range {
        return None;
    }
    let lower = bar.lower_wick() / range;
    let upper = bar.upper_wick() / range;
    if lower >= config.pin_wick_ratio {
        return Some(CandlePattern {
            kind: PatternKind::PinBar,
            direction: Direction::Long,
            strength: lower,
            confidence: 50.0 + 30.0 * lower,
        });
    }
    if upper >= config.pin_wick_ratio {
        return Some(CandlePattern {
            kind: PatternKind::PinBar,
            direction: Direction::Short,
            strength: upper,
            confidence: 50.0 + 30.0 * upper,
        });
    }
    None
}

/// Bar contained in the previous bar's range; direction from its color
pub fn inside_bar(prev: &Bar, bar: &Bar) -> Option<CandlePattern> {
    if bar.high >= prev.high || bar.low <= prev.low || bar.close == bar.open {
        return None;
    }
    let direction = if bar.is_bullish() { Direction::Long } else { Direction::Short };
    Some(CandlePattern {
        kind: PatternKind::InsideBar,
        direction,
        strength: 0.3,
        confidence: 40.0,
    })
}

/// Wide, full-bodied bar relative to ATR
pub fn momentum_thrust(bar: &Bar, atr: f64, config: &CandleConfig) -> Option<CandlePattern> {
    let range = bar.range();
    if atr <= 0.0 || range <= 0.0 {
        return None;
    }
    if bar.body() < config.thrust_body_ratio * range || range < config.thrust_range_atr * atr {
        return None;
    }
    let direction = if bar.is_bullish() { Direction::Long } else { Direction::Short };
    let strength = (range / atr / 3.0).clamp(0.0, 1.0);
    Some(CandlePattern {
        kind: PatternKind::MomentumThrust,
        direction,
        strength,
        confidence: 50.0 + 30.0 * strength,
    })
}

/// All entry patterns on the last bar (pattern path of the signal detector)
pub fn entry_patterns(bars: &[Bar], atr: f64, config: &CandleConfig) -> Vec<CandlePattern> {
    let Some(bar) = bars.last() else {
        return Vec::new();
    };
    let prev = bars.len().checked_sub(2).map(|i| &bars[i]);

    let mut patterns = Vec::new();
    if let Some(p) = pin_bar(bar, config) {
        patterns.push(p);
    }
    if let Some(prev) = prev {
        if let Some(p) = engulfing(prev, bar) {
            patterns.push(p);
        }
        if let Some(p) = inside_bar(prev, bar) {
            patterns.push(p);
        }
    }
    if let Some(p) = momentum_thrust(bar, atr, config) {
        patterns.push(p);
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar { timestamp: Utc::now(), open, high, low, close, volume: 1.0, spread: 0.0 }
    }

    #[test]
    fn test_hammer_and_shooting_star() {
        let config = CandleConfig::default();
        let hammer = hammer_like(&candle(100.0, 100.6, 98.0, 100.5), &config).unwrap();
        assert_eq!(hammer.kind, PatternKind::Hammer);
        assert_eq!(hammer.direction, Direction::Long);

        let star = hammer_like(&candle(100.0, 102.5, 99.9, 99.9), &config).unwrap();
        assert_eq!(star.kind, PatternKind::ShootingStar);

        assert!(hammer_like(&candle(100.0, 101.0, 99.0, 100.9), &config).is_none());
    }

    #[test]
    fn test_engulfing() {
        let prev = candle(101.0, 101.2, 99.8, 100.0);
        let bull = candle(99.9, 101.8, 99.7, 101.5);
        let p = engulfing(&prev, &bull).unwrap();
        assert_eq!(p.kind, PatternKind::BullishEngulfing);

        let weak = candle(100.1, 100.6, 99.9, 100.5);
        assert!(engulfing(&prev, &weak).is_none());
    }

    #[test]
    fn test_reversal_candle_filters_direction() {
        let config = CandleConfig::default();
        let bars = vec![candle(100.0, 100.1, 99.0, 99.2), candle(100.0, 102.5, 99.9, 99.9)];
        let doji = reversal_candle(&bars, Direction::Long, &config).unwrap();
        assert_eq!(doji.kind, PatternKind::Doji);
        let p = reversal_candle(&bars, Direction::Short, &config).unwrap();
        assert_eq!(p.kind, PatternKind::ShootingStar);
    }

    #[test]
    fn test_entry_patterns() {
        let config = CandleConfig::default();
        let bars = vec![candle(100.0, 101.0, 99.0, 100.2), candle(100.2, 103.2, 100.1, 103.0)];
        let patterns = entry_patterns(&bars, 1.0, &config);
        assert!(patterns.iter().any(|p| p.kind == PatternKind::MomentumThrust && p.direction == Direction::Long));

        let inside = vec![candle(100.0, 102.0, 98.0, 101.0), candle(100.5, 101.0, 99.0, 99.5)];
        let patterns = entry_patterns(&inside, 1.0, &config);
        assert!(patterns.iter().any(|p| p.kind == PatternKind::InsideBar && p.direction == Direction::Short));
    }
}
