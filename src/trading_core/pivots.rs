//! Floor-trader pivot levels from the prior completed period
//!
//! - P/R1-R3/S1-S3 from the prior day's (and prior ISO week's) high/low/close
//! - Bar-count fallback when timestamps cannot be bucketed into days
//! - ATR-based touch tolerance for level queries

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::bars::Bar;
use super::indicators;
use crate::error::{CoreError, CoreResult};
use crate::types::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PivotName {
    P,
    R1,
    R2,
    R3,
    S1,
    S2,
    S3,
}

impl PivotName {
    /// Importance rank used for scoring: P > R1/S1 > R2/S2 > R3/S3
    pub fn strength(&self) -> u8 {
        match self {
            PivotName::P => 4,
            PivotName::R1 | PivotName::S1 => 3,
            PivotName::R2 | PivotName::S2 => 2,
            PivotName::R3 | PivotName::S3 => 1,
        }
    }

    pub fn kind(&self) -> LevelKind {
        match self {
            PivotName::P => LevelKind::Pivot,
            PivotName::R1 | PivotName::R2 | PivotName::R3 => LevelKind::Resistance,
            PivotName::S1 | PivotName::S2 | PivotName::S3 => LevelKind::Support,
        }
    }
}

impl std::fmt::Display for PivotName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PivotName::P => write!(f, "P"),
            PivotName::R1 => write!(f, "R1"),
            PivotName::R2 => write!(f, "R2"),
            PivotName::R3 => write!(f, "R3"),
            PivotName::S1 => write!(f, "S1"),
            PivotName::S2 => write!(f, "S2"),
            PivotName::S3 => write!(f, "S3"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LevelKind {
    Pivot,
    Resistance,
    Support,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PivotTimeframe {
    Daily,
    Weekly,
}

/// Which side of a price to search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelSide {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PivotLevel {
    pub name: PivotName,
    pub value: f64,
    pub kind: LevelKind,
    pub timeframe: PivotTimeframe,
    pub strength: u8,
}

/// One timeframe's pivot levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotSet {
    pub timeframe: PivotTimeframe,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub levels: Vec<PivotLevel>,
}

impl PivotSet {
    pub fn from_hlc(high: f64, low: f64, close: f64, timeframe: PivotTimeframe) -> CoreResult<Self> {
        if !(high.is_finite() && low.is_finite() && close.is_finite()) {
            return Err(CoreError::MalformedLevels(format!(
                "{:?} period has non-finite prices: H={} L={} C={}",
                timeframe, high, low, close
            )));
        }
        if high < low {
            return Err(CoreError::MalformedLevels(format!(
                "{:?} period high {} below low {}",
                timeframe, high, low
            )));
        }

        let p = (high + low + close) / 3.0;
        let values = [
            (PivotName::P, p),
            (PivotName::R1, 2.0 * p - low),
            (PivotName::R2, p + (high - low)),
            (PivotName::R3, high + 2.0 * (p - low)),
            (PivotName::S1, 2.0 * p - high),
            (PivotName::S2, p - (high - low)),
            (PivotName::S3, low - 2.0 * (high - p)),
        ];

        let levels = values
            .iter()
            .map(|&(name, value)| PivotLevel {
                name,
                value,
                kind: name.kind(),
                timeframe,
                strength: name.strength(),
            })
            .collect();

        Ok(Self { timeframe, high, low, close, levels })
    }

    pub fn level(&self, name: PivotName) -> Option<&PivotLevel> {
        self.levels.iter().find(|l| l.name == name)
    }
}

/// Pivot levels computed for one cycle, with the ATR used for tolerances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotLevels {
    pub daily: Option<PivotSet>,
    pub weekly: Option<PivotSet>,
    pub atr: f64,
    pub touch_tolerance_atr: f64,
}

impl PivotLevels {
    pub fn empty() -> Self {
        Self { daily: None, weekly: None, atr: 0.0, touch_tolerance_atr: 0.0 }
    }

    pub fn is_empty(&self) -> bool {
        self.daily.is_none() && self.weekly.is_none()
    }

    /// Every level from every timeframe
    pub fn all(&self) -> impl Iterator<Item = &PivotLevel> {
        self.daily
            .iter()
            .chain(self.weekly.iter())
            .flat_map(|set| set.levels.iter())
    }

    pub fn tolerance(&self) -> f64 {
        self.atr * self.touch_tolerance_atr
    }

    pub fn touches(&self, price: f64, level: &PivotLevel) -> bool {
        (price - level.value).abs() <= self.tolerance()
    }

    /// Closest level strictly above or below `price`
    pub fn nearest(&self, price: f64, side: LevelSide) -> Option<&PivotLevel> {
        self.all()
            .filter(|l| match side {
                LevelSide::Above => l.value > price,
                LevelSide::Below => l.value < price,
            })
            .min_by(|a, b| (a.value - price).abs().total_cmp(&(b.value - price).abs()))
    }

    /// Levels within `max_atr_distance` ATRs of `price`, closest first
    pub fn confluence(&self, price: f64, max_atr_distance: f64) -> Vec<&PivotLevel> {
        if self.atr <= 0.0 {
            return Vec::new();
        }
        let max_distance = self.atr * max_atr_distance;
        let mut levels: Vec<&PivotLevel> = self
            .all()
            .filter(|l| (l.value - price).abs() <= max_distance)
            .collect();
        levels.sort_by(|a, b| (a.value - price).abs().total_cmp(&(b.value - price).abs()));
        levels
    }
}

/// Configuration for pivot computation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PivotConfig {
    /// Bars required before any levels are produced (default: 20)
    pub min_bars: usize,
    /// ATR period for touch tolerance (default: 14)
    pub atr_period: usize,
    /// Touch tolerance as a multiple of ATR (default: 0.20)
    pub touch_tolerance_atr: f64,
    /// Also compute prior-week levels (default: true)
    pub include_weekly: bool,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            min_bars: 20,
            atr_period: 14,
            touch_tolerance_atr: 0.20,
            include_weekly: true,
        }
    }
}

pub struct PivotCalculator {
    config: PivotConfig,
}

impl PivotCalculator {
    pub fn new(config: PivotConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PivotConfig {
        &self.config
    }

    /// Compute daily (and weekly) pivots from the prior completed period.
    ///
    /// Returns empty levels below `min_bars`; a malformed period is an error.
    pub fn calculate(&self, bars: &[Bar], timeframe: Timeframe) -> CoreResult<PivotLevels> {
        if bars.len() < self.config.min_bars {
            return Ok(PivotLevels::empty());
        }

        let atr = indicators::atr(bars, self.config.atr_period);
        let reliable = timestamps_reliable(bars);

        let daily_hlc = if reliable {
            prior_day_hlc(bars).or_else(|| fallback_hlc(bars, timeframe.bars_per_day()))
        } else {
            fallback_hlc(bars, timeframe.bars_per_day())
        };
        let daily = daily_hlc
            .map(|(h, l, c)| PivotSet::from_hlc(h, l, c, PivotTimeframe::Daily))
            .transpose()?;

        let weekly = if self.config.include_weekly && reliable {
            prior_week_hlc(bars)
                .map(|(h, l, c)| PivotSet::from_hlc(h, l, c, PivotTimeframe::Weekly))
                .transpose()?
        } else {
            None
        };

        if let Some(ref set) = daily {
            tracing::debug!(
                "Daily pivots from H={:.5} L={:.5} C={:.5} (atr={:.5}, reliable_ts={})",
                set.high, set.low, set.close, atr, reliable
            );
        }

        Ok(PivotLevels {
            daily,
            weekly,
            atr,
            touch_tolerance_atr: self.config.touch_tolerance_atr,
        })
    }
}

impl Default for PivotCalculator {
    fn default() -> Self {
        Self::new(PivotConfig::default())
    }
}

fn hlc(bars: &[Bar]) -> Option<(f64, f64, f64)> {
    let last = bars.last()?;
    Some((indicators::highest_high(bars), indicators::lowest_low(bars), last.close))
}

/// Strictly increasing timestamps that span more than one instant
fn timestamps_reliable(bars: &[Bar]) -> bool {
    if bars.len() < 2 {
        return false;
    }
    bars.windows(2).all(|w| w[1].timestamp > w[0].timestamp)
}

fn prior_day_hlc(bars: &[Bar]) -> Option<(f64, f64, f64)> {
    let current = bars.last()?.timestamp.date_naive();
    let prior: NaiveDate = bars
        .iter()
        .rev()
        .map(|b| b.timestamp.date_naive())
        .find(|d| *d < current)?;

    let day: Vec<Bar> = bars
        .iter()
        .filter(|b| b.timestamp.date_naive() == prior)
        .cloned()
        .collect();
    hlc(&day)
}

fn prior_week_hlc(bars: &[Bar]) -> Option<(f64, f64, f64)> {
    let week_key = |b: &Bar| {
        let w = b.timestamp.iso_week();
        (w.year(), w.week())
    };
    let current = week_key(bars.last()?);
    let prior = bars.iter().rev().map(week_key).find(|k| *k < current)?;

    let week: Vec<Bar> = bars.iter().filter(|b| week_key(b) == prior).cloned().collect();
    hlc(&week)
}

/// Prior period by bar count: skip the most recent day's worth of bars
/// (at most half the window) and take up to one day before that.
fn fallback_hlc(bars: &[Bar], bars_per_day: usize) -> Option<(f64, f64, f64)> {
    let recent = bars_per_day.min(bars.len() / 2).max(1);
    let end = bars.len().saturating_sub(recent);
    let start = end.saturating_sub(bars_per_day);
    if end <= start {
        return None;
    }
    hlc(&bars[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::testing::{bars_from_closes, bars_with_timestamps, ts};

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_floor_pivot_identities() {
        let set = PivotSet::from_hlc(110.0, 100.0, 104.0, PivotTimeframe::Daily).unwrap();
        let v = |n| set.level(n).unwrap().value;
        let range = 10.0;

        assert_close(v(PivotName::P), 314.0 / 3.0);
        assert_close(v(PivotName::R1) - v(PivotName::S1), range);
        assert_close(v(PivotName::R2) - v(PivotName::P), range);
        assert_close(v(PivotName::P) - v(PivotName::S2), range);
        assert_close(v(PivotName::R3) - v(PivotName::R2), v(PivotName::R1) - v(PivotName::P));
        assert_close(v(PivotName::S2) - v(PivotName::S3), v(PivotName::P) - v(PivotName::S1));
        assert!(v(PivotName::R3) > v(PivotName::R2) && v(PivotName::R2) > v(PivotName::R1));
        assert!(v(PivotName::S1) > v(PivotName::S2) && v(PivotName::S2) > v(PivotName::S3));
    }

    #[test]
    fn test_malformed_period_is_error() {
        assert!(matches!(
            PivotSet::from_hlc(99.0, 100.0, 99.5, PivotTimeframe::Daily),
            Err(CoreError::MalformedLevels(_))
        ));
        assert!(PivotSet::from_hlc(f64::NAN, 100.0, 99.5, PivotTimeframe::Daily).is_err());
    }

    #[test]
    fn test_insufficient_bars_is_empty() {
        let calc = PivotCalculator::default();
        let bars = bars_from_closes(&[100.0; 19], 1.0);
        let levels = calc.calculate(&bars, Timeframe::M15).unwrap();
        assert!(levels.is_empty());
        assert_eq!(calc.calculate(&[], Timeframe::M15).unwrap(), PivotLevels::empty());
    }

    #[test]
    fn test_prior_day_from_timestamps() {
        // 96 bars on day one rising 100 -> 109.5, then 20 bars on day two
        let mut closes: Vec<f64> = (0..96).map(|i| 100.0 + i as f64 * 0.1).collect();
        closes.extend(std::iter::repeat(120.0).take(20));
        let bars = bars_from_closes(&closes, 0.2);

        let levels = PivotCalculator::default().calculate(&bars, Timeframe::M15).unwrap();
        let daily = levels.daily.unwrap();
        assert_close(daily.close, 109.5);
        assert_close(daily.high, bars[95].high);
        assert_close(daily.low, bars[0].low);
        assert!(levels.weekly.is_none());
    }

    #[test]
    fn test_prior_week_from_timestamps() {
        // 4-hour bars: Monday 2025-03-03 through Sunday rising 100 -> 120.5,
        // then one day of the next ISO week at 125
        let mut closes: Vec<f64> = (0..42).map(|i| 100.0 + i as f64 * 0.5).collect();
        closes.extend(std::iter::repeat(125.0).take(6));
        let stamps: Vec<_> = (0..closes.len()).map(|i| ts(i * 16)).collect();
        let bars = bars_with_timestamps(&closes, &stamps, 1.0);

        let levels = PivotCalculator::default().calculate(&bars, Timeframe::H4).unwrap();
        let weekly = levels.weekly.unwrap();
        assert_eq!(weekly.timeframe, PivotTimeframe::Weekly);
        assert_close(weekly.high, bars[41].high);
        assert_close(weekly.low, bars[0].low);
        assert_close(weekly.close, 120.5);
        assert_close(
            weekly.level(PivotName::P).unwrap().value,
            (bars[41].high + bars[0].low + 120.5) / 3.0,
        );
        // Prior day is the Sunday alone
        assert_close(levels.daily.unwrap().low, bars[36].low);

        let daily_only = PivotCalculator::new(PivotConfig { include_weekly: false, ..Default::default() });
        assert!(daily_only.calculate(&bars, Timeframe::H4).unwrap().weekly.is_none());
    }

    #[test]
    fn test_bar_count_fallback_when_timestamps_collapse() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let stamps = vec![ts(0); 40];
        let bars = bars_with_timestamps(&closes, &stamps, 0.0);

        // H1 => 24 bars/day; recent = min(24, 20) = 20, prior = bars[0..20]
        let levels = PivotCalculator::default().calculate(&bars, Timeframe::H1).unwrap();
        let daily = levels.daily.unwrap();
        assert_close(daily.close, 119.0);
        assert_close(daily.low, 100.0);
        assert!(levels.weekly.is_none());
    }

    #[test]
    fn test_level_queries() {
        let levels = PivotLevels {
            daily: Some(PivotSet::from_hlc(110.0, 100.0, 105.0, PivotTimeframe::Daily).unwrap()),
            weekly: None,
            atr: 2.0,
            touch_tolerance_atr: 0.2,
        };
        // P = 105, R1 = 110, S1 = 100, R2 = 115, S2 = 95
        let p = levels.nearest(106.0, LevelSide::Below).unwrap();
        assert_eq!(p.name, PivotName::P);
        let r1 = levels.nearest(106.0, LevelSide::Above).unwrap();
        assert_eq!(r1.name, PivotName::R1);

        assert!(levels.touches(105.35, p));
        assert!(!levels.touches(105.5, p));

        let near = levels.confluence(107.0, 1.5);
        assert_eq!(near.len(), 2);
        assert_eq!(near[0].name, PivotName::P);
        assert_eq!(near[1].name, PivotName::R1);
    }
}
