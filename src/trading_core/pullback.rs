//! Trend pullback detection
//!
//! In an established trend, waits for price to retrace part of the last leg,
//! then proposes an entry at the strongest level below (uptrend) or above
//! (downtrend) the market: Fibonacci retracements, pivots, VWAP, moving
//! averages, double bottoms/tops and the intraday extreme.

use serde::{Deserialize, Serialize};

use super::bars::Bar;
use super::candles::{self, CandleConfig, CandlePattern};
use super::indicators;
use super::microstructure::MicrostructureSummary;
use super::pivots::{PivotLevels, PivotName};
use super::regime::RegimeState;
use super::swings::{SwingKind, SwingState};
use crate::types::{Direction, TrendDirection};

/// Where price sits relative to the last trend leg
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PullbackZoneState {
    InZone { retracement: f64 },
    NoPullbackYet { retracement: f64 },
    TooDeep { retracement: f64 },
    /// No swing extreme or leg origin to measure against
    NoStructure,
}

impl PullbackZoneState {
    pub fn classify(leg: Option<&PullbackLeg>, min_pct: f64, max_pct: f64) -> Self {
        let Some(leg) = leg else {
            return PullbackZoneState::NoStructure;
        };
        let retracement = leg.retracement_pct;
        if retracement < min_pct {
            PullbackZoneState::NoPullbackYet { retracement }
        } else if retracement > max_pct {
            PullbackZoneState::TooDeep { retracement }
        } else {
            PullbackZoneState::InZone { retracement }
        }
    }

    pub fn is_in_zone(&self) -> bool {
        matches!(self, PullbackZoneState::InZone { .. })
    }

    pub fn retracement(&self) -> Option<f64> {
        match self {
            PullbackZoneState::InZone { retracement }
            | PullbackZoneState::NoPullbackYet { retracement }
            | PullbackZoneState::TooDeep { retracement } => Some(*retracement),
            PullbackZoneState::NoStructure => None,
        }
    }
}

impl std::fmt::Display for PullbackZoneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullbackZoneState::InZone { retracement } => write!(f, "in zone ({:.1}%)", retracement),
            PullbackZoneState::NoPullbackYet { retracement } => write!(f, "no pullback yet ({:.1}%)", retracement),
            PullbackZoneState::TooDeep { retracement } => write!(f, "too deep ({:.1}%)", retracement),
            PullbackZoneState::NoStructure => write!(f, "no structure"),
        }
    }
}

/// The last trend leg and how far price has come back into it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PullbackLeg {
    pub direction: Direction,
    /// Swing high (long) or low (short) that ended the leg
    pub swing_extreme: f64,
    pub swing_index: usize,
    /// Where the leg started
    pub origin: f64,
    /// Furthest point of the pullback since the swing extreme
    pub pullback_extreme: f64,
    pub retracement_pct: f64,
}

impl PullbackLeg {
    /// Measure the last leg in `direction`. The origin is the last opposite
    /// swing before the extreme, else the furthest price within
    /// `origin_lookback` bars before it.
    pub fn measure(bars: &[Bar], swings: &SwingState, direction: Direction, origin_lookback: usize) -> Option<Self> {
        let current = bars.last()?;
        let (extreme_kind, origin_kind) = match direction {
            Direction::Long => (SwingKind::High, SwingKind::Low),
            Direction::Short => (SwingKind::Low, SwingKind::High),
        };
        let extreme = swings.swings.iter().rev().find(|s| s.kind == extreme_kind)?;
        if extreme.index >= bars.len() {
            return None;
        }

        let origin = match swings.last_before(origin_kind, extreme.index) {
            Some(s) => s.price,
            None => {
                let before = &bars[extreme.index.saturating_sub(origin_lookback)..extreme.index];
                if before.is_empty() {
                    return None;
                }
                match direction {
                    Direction::Long => indicators::lowest_low(before),
                    Direction::Short => indicators::highest_high(before),
                }
            }
        };

        let leg = (extreme.price - origin) * direction.sign();
        if leg <= 0.0 {
            return None;
        }

        let after = &bars[extreme.index + 1..];
        let pullback_extreme = if after.is_empty() {
            current.close
        } else {
            match direction {
                Direction::Long => indicators::lowest_low(after),
                Direction::Short => indicators::highest_high(after),
            }
        };
        let retracement_pct = (extreme.price - current.close) * direction.sign() / leg * 100.0;

        Some(Self {
            direction,
            swing_extreme: extreme.price,
            swing_index: extreme.index,
            origin,
            pullback_extreme,
            retracement_pct,
        })
    }

    pub fn size(&self) -> f64 {
        (self.swing_extreme - self.origin).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LevelSource {
    Fibonacci { ratio: f64 },
    Pivot(PivotName),
    Vwap,
    FastSma,
    SlowSma,
    DoubleBottom,
    DoubleTop,
    IntradayLow,
    IntradayHigh,
}

impl LevelSource {
    /// Structural levels earn the extra confluence bonus
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            LevelSource::Pivot(_)
                | LevelSource::DoubleBottom
                | LevelSource::DoubleTop
                | LevelSource::IntradayLow
                | LevelSource::IntradayHigh
        )
    }

    fn is_high_probability(&self) -> bool {
        match self {
            LevelSource::Fibonacci { ratio } => (*ratio - 61.8).abs() < 1e-9,
            LevelSource::Vwap
            | LevelSource::DoubleBottom
            | LevelSource::DoubleTop
            | LevelSource::IntradayLow
            | LevelSource::IntradayHigh => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for LevelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelSource::Fibonacci { ratio } => write!(f, "fib {:.1}%", ratio),
            LevelSource::Pivot(name) => write!(f, "pivot {}", name),
            LevelSource::Vwap => write!(f, "VWAP"),
            LevelSource::FastSma => write!(f, "fast SMA"),
            LevelSource::SlowSma => write!(f, "slow SMA"),
            LevelSource::DoubleBottom => write!(f, "double bottom"),
            LevelSource::DoubleTop => write!(f, "double top"),
            LevelSource::IntradayLow => write!(f, "intraday low"),
            LevelSource::IntradayHigh => write!(f, "intraday high"),
        }
    }
}

/// A candidate entry level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntryLevel {
    pub price: f64,
    pub source: LevelSource,
    /// 0..1
    pub strength: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullbackOpportunity {
    pub direction: TrendDirection,
    pub entry_price: f64,
    pub entry_source: LevelSource,
    pub reason: String,
    pub quality: f64,
    pub confluence_count: usize,
    pub retracement_pct: f64,
    pub swing_extreme: f64,
    pub leg_origin: f64,
    pub pullback_extreme: f64,
    pub reversal: Option<CandlePattern>,
    /// Levels within the confluence distance of the entry
    pub confluent_levels: Vec<EntryLevel>,
}

impl PullbackOpportunity {
    pub fn trade_direction(&self) -> Option<Direction> {
        Direction::from_trend(self.direction)
    }
}

/// Configuration for pullback detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PullbackConfig {
    /// Trend strength floor (default: ADX 20)
    pub min_adx: f64,
    /// Retracement window of an active pullback, percent (default: 38.2 / 61.8)
    pub min_retracement_pct: f64,
    pub max_retracement_pct: f64,
    /// Fibonacci ratios and their level strengths
    pub fib_levels: Vec<(f64, f64)>,
    /// Candidates must be at least this many ATRs from price (default: 0.5)
    pub min_level_distance_atr: f64,
    /// ... and at most this far, percent of price (default: 5)
    pub max_level_distance_pct: f64,
    /// VWAP is a candidate within this distance, percent (default: 1)
    pub vwap_max_distance_pct: f64,
    pub fast_sma: usize,
    pub slow_sma: usize,
    /// Double bottom/top: extremes within this many ATRs (default: 0.25)
    pub double_tolerance_atr: f64,
    /// ... separated by a counter move of at least this many ATRs (default: 1.0)
    pub double_min_separation_atr: f64,
    /// Levels within this many ATRs of the best one are confluent (default: 0.5)
    pub confluence_atr: f64,
    /// Bars searched for a leg origin when no swing precedes the extreme (default: 20)
    pub origin_lookback: usize,
    pub base_quality: f64,
    /// Opportunities below this are dropped (default: 40)
    pub min_quality: f64,
    pub atr_period: usize,
}

impl Default for PullbackConfig {
    fn default() -> Self {
        Self {
            min_adx: 20.0,
            min_retracement_pct: 38.2,
            max_retracement_pct: 61.8,
            fib_levels: vec![(23.6, 0.5), (38.2, 0.7), (50.0, 0.75), (61.8, 0.9), (78.6, 0.6)],
            min_level_distance_atr: 0.5,
            max_level_distance_pct: 5.0,
            vwap_max_distance_pct: 1.0,
            fast_sma: 21,
            slow_sma: 50,
            double_tolerance_atr: 0.25,
            double_min_separation_atr: 1.0,
            confluence_atr: 0.5,
            origin_lookback: 20,
            base_quality: 40.0,
            min_quality: 40.0,
            atr_period: 14,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PullbackDetector {
    config: PullbackConfig,
    candles: CandleConfig,
}

impl PullbackDetector {
    pub fn new(config: PullbackConfig, candles: CandleConfig) -> Self {
        Self { config, candles }
    }

    pub fn config(&self) -> &PullbackConfig {
        &self.config
    }

    pub fn detect(
        &self,
        bars: &[Bar],
        regime: &RegimeState,
        swings: &SwingState,
        pivots: &PivotLevels,
        micro: Option<&MicrostructureSummary>,
    ) -> Option<PullbackOpportunity> {
        let cfg = &self.config;
        let current = bars.last()?;
        if regime.adx < cfg.min_adx {
            return None;
        }
        let direction = regime.trade_direction()?;

        let leg = PullbackLeg::measure(bars, swings, direction, cfg.origin_lookback);
        let zone = PullbackZoneState::classify(leg.as_ref(), cfg.min_retracement_pct, cfg.max_retracement_pct);
        let (Some(leg), PullbackZoneState::InZone { retracement }) = (leg, zone) else {
            tracing::debug!("Pullback: {} ({})", zone, direction);
            return None;
        };

        let atr = indicators::atr(bars, cfg.atr_period);
        if atr <= 0.0 {
            return None;
        }

        let reversal = candles::reversal_candle(bars, direction, &self.candles);
        let candidates = self.candidates(bars, &leg, swings, pivots, micro, atr);
        let best = candidates
            .iter()
            .copied()
            .max_by(|a, b| self.level_score(a, current.close, atr).total_cmp(&self.level_score(b, current.close, atr)))?;

        let confluent: Vec<EntryLevel> = candidates
            .iter()
            .copied()
            .filter(|l| (l.price - best.price).abs() <= cfg.confluence_atr * atr)
            .collect();

        let mut quality = cfg.base_quality;
        quality += if regime.adx >= 40.0 {
            15.0
        } else if regime.adx >= 30.0 {
            10.0
        } else {
            5.0
        };
        quality += if (retracement - 50.0).abs() <= 6.2 { 15.0 } else { 10.0 };
        quality += match confluent.len() {
            n if n >= 4 => 15.0,
            3 => 10.0,
            2 => 5.0,
            _ => 0.0,
        };
        if confluent.iter().any(|l| l.source.is_structural()) {
            quality += 5.0;
        }
        let avg_strength = indicators::mean(&confluent.iter().map(|l| l.strength).collect::<Vec<_>>());
        if avg_strength >= 0.8 {
            quality += 10.0;
        } else if avg_strength >= 0.6 {
            quality += 5.0;
        }
        if micro.is_some_and(|m| m.high_quality_time) {
            quality += 5.0;
        }
        if pullback_volume_decreasing(bars, &leg) {
            quality += 5.0;
        }
        quality += match reversal {
            Some(p) => 15.0 * p.strength,
            None => -10.0,
        };
        let quality = quality.clamp(0.0, 100.0);

        if quality < cfg.min_quality {
            tracing::debug!("Pullback quality {:.1} below {:.1}", quality, cfg.min_quality);
            return None;
        }

        let reason = format!(
            "{} pullback {:.1}% to {} ({} confluent{})",
            direction,
            retracement,
            best.source,
            confluent.len(),
            reversal.map(|p| format!(", {}", p.kind)).unwrap_or_default()
        );
        tracing::debug!("Pullback opportunity: {} quality={:.1}", reason, quality);

        Some(PullbackOpportunity {
            direction: regime.direction,
            entry_price: best.price,
            entry_source: best.source,
            reason,
            quality,
            confluence_count: confluent.len(),
            retracement_pct: retracement,
            swing_extreme: leg.swing_extreme,
            leg_origin: leg.origin,
            pullback_extreme: leg.pullback_extreme,
            reversal,
            confluent_levels: confluent,
        })
    }

    /// Candidate levels on the entry side of price within the distance band
    fn candidates(
        &self,
        bars: &[Bar],
        leg: &PullbackLeg,
        swings: &SwingState,
        pivots: &PivotLevels,
        micro: Option<&MicrostructureSummary>,
        atr: f64,
    ) -> Vec<EntryLevel> {
        let cfg = &self.config;
        let Some(current) = bars.last() else {
            return Vec::new();
        };
        let close = current.close;
        let sign = leg.direction.sign();
        let mut levels = Vec::new();

        for &(ratio, strength) in &cfg.fib_levels {
            let price = leg.swing_extreme - sign * leg.size() * ratio / 100.0;
            levels.push(EntryLevel { price, source: LevelSource::Fibonacci { ratio }, strength });
        }

        for level in pivots.all() {
            levels.push(EntryLevel {
                price: level.value,
                source: LevelSource::Pivot(level.name),
                strength: level.strength as f64 / 4.0,
            });
        }

        if let Some(m) = micro {
            if m.vwap > 0.0 && (close - m.vwap).abs() / close * 100.0 <= cfg.vwap_max_distance_pct {
                levels.push(EntryLevel { price: m.vwap, source: LevelSource::Vwap, strength: 0.8 });
            }
        }

        let closes = indicators::closes(bars);
        if let Some(price) = indicators::sma(&closes, cfg.fast_sma) {
            levels.push(EntryLevel { price, source: LevelSource::FastSma, strength: 0.6 });
        }
        if let Some(price) = indicators::sma(&closes, cfg.slow_sma) {
            levels.push(EntryLevel { price, source: LevelSource::SlowSma, strength: 0.7 });
        }

        if let Some(level) = self.double_extreme(bars, swings, leg.direction, atr) {
            levels.push(level);
        }

        let today = current.timestamp.date_naive();
        let session: Vec<Bar> = bars
            .iter()
            .filter(|b| b.timestamp.date_naive() == today)
            .cloned()
            .collect();
        if !session.is_empty() {
            let (price, source) = match leg.direction {
                Direction::Long => (indicators::lowest_low(&session), LevelSource::IntradayLow),
                Direction::Short => (indicators::highest_high(&session), LevelSource::IntradayHigh),
            };
            levels.push(EntryLevel { price, source, strength: 0.65 });
        }

        levels.retain(|l| {
            let distance = (close - l.price) * sign;
            distance >= cfg.min_level_distance_atr * atr && distance / close * 100.0 <= cfg.max_level_distance_pct
        });
        levels
    }

    /// Two similar swing lows (highs) separated by a real counter move
    fn double_extreme(&self, bars: &[Bar], swings: &SwingState, direction: Direction, atr: f64) -> Option<EntryLevel> {
        let cfg = &self.config;
        let kind = match direction {
            Direction::Long => SwingKind::Low,
            Direction::Short => SwingKind::High,
        };
        let points: Vec<_> = swings.swings.iter().filter(|s| s.kind == kind).collect();
        for pair in points.windows(2).rev() {
            let (first, second) = (pair[0], pair[1]);
            if (first.price - second.price).abs() > cfg.double_tolerance_atr * atr || second.index > bars.len() {
                continue;
            }
            let between = &bars[first.index..second.index];
            if between.is_empty() {
                continue;
            }
            let separation = match direction {
                Direction::Long => indicators::highest_high(between) - first.price.max(second.price),
                Direction::Short => first.price.min(second.price) - indicators::lowest_low(between),
            };
            if separation >= cfg.double_min_separation_atr * atr {
                let (price, source) = match direction {
                    Direction::Long => (first.price.min(second.price), LevelSource::DoubleBottom),
                    Direction::Short => (first.price.max(second.price), LevelSource::DoubleTop),
                };
                return Some(EntryLevel { price, source, strength: 0.85 });
            }
        }
        None
    }

    /// Strength, distance from price, and level type
    fn level_score(&self, level: &EntryLevel, close: f64, atr: f64) -> f64 {
        let distance_atr = (close - level.price).abs() / atr;
        let distance_bonus = if (0.5..=1.5).contains(&distance_atr) {
            20.0
        } else if distance_atr <= 2.5 {
            10.0
        } else {
            0.0
        };
        let type_bonus = if level.source.is_high_probability() { 15.0 } else { 0.0 };
        level.strength * 50.0 + distance_bonus + type_bonus
    }
}

/// Average volume during the pullback below the average during the leg
fn pullback_volume_decreasing(bars: &[Bar], leg: &PullbackLeg) -> bool {
    let idx = leg.swing_index;
    if idx + 1 >= bars.len() || idx == 0 {
        return false;
    }
    let pullback: Vec<f64> = bars[idx + 1..].iter().map(|b| b.volume).collect();
    let start = idx.saturating_sub(pullback.len().max(5));
    let leg_volume: Vec<f64> = bars[start..=idx].iter().map(|b| b.volume).collect();
    indicators::mean(&pullback) < indicators::mean(&leg_volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::regime::RegimeClassifier;
    use crate::trading_core::swings::SwingDetector;
    use crate::trading_core::testing::{bars_from_closes, scenario};

    fn detector() -> PullbackDetector {
        PullbackDetector::new(PullbackConfig::default(), CandleConfig::default())
    }

    #[test]
    fn test_zone_classification() {
        let leg = PullbackLeg {
            direction: Direction::Long,
            swing_extreme: 110.0,
            swing_index: 10,
            origin: 100.0,
            pullback_extreme: 105.0,
            retracement_pct: 45.0,
        };
        assert!(PullbackZoneState::classify(Some(&leg), 38.2, 61.8).is_in_zone());

        let shallow = PullbackLeg { retracement_pct: 20.0, ..leg };
        assert_eq!(
            PullbackZoneState::classify(Some(&shallow), 38.2, 61.8),
            PullbackZoneState::NoPullbackYet { retracement: 20.0 }
        );
        let deep = PullbackLeg { retracement_pct: 70.0, ..leg };
        assert!(matches!(PullbackZoneState::classify(Some(&deep), 38.2, 61.8), PullbackZoneState::TooDeep { .. }));
        assert_eq!(PullbackZoneState::classify(None, 38.2, 61.8), PullbackZoneState::NoStructure);
    }

    #[test]
    fn test_leg_measurement_uses_prior_swing_low() {
        let mut closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        closes.extend((1..=8).map(|i| 114.0 - i as f64 * 0.75));
        closes.extend((1..=12).map(|i| 108.0 + i as f64));
        closes.extend((1..=6).map(|i| 120.0 - i as f64));
        let bars = bars_from_closes(&closes, 0.4);
        let swings = SwingDetector::default().detect(&bars, None);

        let leg = PullbackLeg::measure(&bars, &swings, Direction::Long, 20).unwrap();
        assert!((leg.swing_extreme - bars[34].high).abs() < 1e-9);
        assert!((leg.origin - bars[22].low).abs() < 1e-9);
        let expected = (leg.swing_extreme - 114.0) / leg.size() * 100.0;
        assert!((leg.retracement_pct - expected).abs() < 1e-9);
    }

    #[test]
    fn test_requires_trend() {
        let bars = bars_from_closes(&[100.0; 60], 0.5);
        let regime = RegimeClassifier::default().detect(&bars);
        let swings = SwingDetector::default().detect(&bars, None);
        let result = detector().detect(&bars, &regime, &swings, &PivotLevels::empty(), None);
        assert!(result.is_none());
    }

    #[test]
    fn test_uptrend_pullback_with_hammer() {
        let bars = scenario::uptrend_pullback(true);
        let regime = RegimeClassifier::default().detect(&bars);
        let swings = SwingDetector::default().detect(&bars, None);
        let opp = detector()
            .detect(&bars, &regime, &swings, &PivotLevels::empty(), None)
            .expect("pullback opportunity");

        assert_eq!(opp.direction, TrendDirection::Up);
        assert!(opp.retracement_pct > 38.2 && opp.retracement_pct < 61.8);
        assert!(opp.entry_price < bars.last().unwrap().close);
        assert_eq!(opp.reversal.map(|p| p.direction), Some(Direction::Long));
        assert!(opp.quality >= 60.0);
    }
}
