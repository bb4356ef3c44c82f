//! Swing point detection
//!
//! A bar is a swing HIGH when its high is strictly above every high in the
//! lookback window on both sides. The right side of the window is truncated
//! at the newest bar, so a developing extreme is reported before it is
//! confirmed. Candidates closer than `min_move_pct` to the previously
//! accepted swing are dropped as noise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bars::Bar;
use super::indicators;
use super::pivots::PivotLevels;
use crate::types::TrendDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    High,
    Low,
}

impl std::fmt::Display for SwingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwingKind::High => write!(f, "HIGH"),
            SwingKind::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swing {
    /// Index into the bar window the swing was detected on
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub kind: SwingKind,
    /// Absolute % move from the previously accepted swing (0 for the first)
    pub amplitude_pct: f64,
    /// Within `pivot_distance_atr` of a pivot level
    pub pivot_confluence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingState {
    pub swings: Vec<Swing>,
    pub last_high: Option<Swing>,
    pub last_low: Option<Swing>,
    pub trend: TrendDirection,
    pub quality: f64,
    /// Number of HIGH/LOW alternations in `swings`
    pub rotation_count: usize,
}

impl SwingState {
    pub fn empty(base_quality: f64) -> Self {
        Self {
            swings: Vec::new(),
            last_high: None,
            last_low: None,
            trend: TrendDirection::Sideways,
            quality: base_quality,
            rotation_count: 0,
        }
    }

    pub fn highs(&self) -> impl Iterator<Item = &Swing> {
        self.swings.iter().filter(|s| s.kind == SwingKind::High)
    }

    pub fn lows(&self) -> impl Iterator<Item = &Swing> {
        self.swings.iter().filter(|s| s.kind == SwingKind::Low)
    }

    /// Most recent swing of `kind` strictly before bar `index`
    pub fn last_before(&self, kind: SwingKind, index: usize) -> Option<&Swing> {
        self.swings
            .iter()
            .rev()
            .find(|s| s.kind == kind && s.index < index)
    }
}

/// Configuration for swing detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingConfig {
    /// Bars on each side a swing must dominate (default: 5)
    pub lookback: usize,
    /// Minimum move from the previous swing, percent (default: 0.15)
    pub min_move_pct: f64,
    /// Quality before bonuses (default: 50)
    pub base_quality: f64,
    /// Bonus per accepted swing (default: 5)
    pub per_swing_bonus: f64,
    /// Cap on the per-swing bonus total (default: 30)
    pub max_swing_bonus: f64,
    /// Distance in ATR for pivot confluence (default: 0.5)
    pub pivot_distance_atr: f64,
    /// Bonus per swing with pivot confluence (default: 5)
    pub pivot_bonus: f64,
    /// Cap on the pivot bonus total (default: 15)
    pub max_pivot_bonus: f64,
    pub atr_period: usize,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            lookback: 5,
            min_move_pct: 0.15,
            base_quality: 50.0,
            per_swing_bonus: 5.0,
            max_swing_bonus: 30.0,
            pivot_distance_atr: 0.5,
            pivot_bonus: 5.0,
            max_pivot_bonus: 15.0,
            atr_period: 14,
        }
    }
}

pub struct SwingDetector {
    config: SwingConfig,
}

impl SwingDetector {
    pub fn new(config: SwingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SwingConfig {
        &self.config
    }

    pub fn detect(&self, bars: &[Bar], pivots: Option<&PivotLevels>) -> SwingState {
        let lb = self.config.lookback.max(1);
        if bars.len() < 2 * lb + 1 {
            return SwingState::empty(self.config.base_quality);
        }

        let atr = pivots
            .filter(|p| p.atr > 0.0)
            .map(|p| p.atr)
            .unwrap_or_else(|| indicators::atr(bars, self.config.atr_period));

        let mut swings: Vec<Swing> = Vec::new();
        for i in lb..bars.len() {
            let left = &bars[i - lb..i];
            let right = &bars[i + 1..(i + lb + 1).min(bars.len())];
            let bar = &bars[i];

            let is_high = left.iter().chain(right).all(|b| b.high < bar.high);
            let is_low = left.iter().chain(right).all(|b| b.low > bar.low);

            if is_high {
                self.accept(&mut swings, i, bar, bar.high, SwingKind::High, pivots, atr);
            }
            if is_low {
                self.accept(&mut swings, i, bar, bar.low, SwingKind::Low, pivots, atr);
            }
        }

        let last_high = swings.iter().rev().find(|s| s.kind == SwingKind::High).cloned();
        let last_low = swings.iter().rev().find(|s| s.kind == SwingKind::Low).cloned();
        let trend = structure_trend(&swings);
        let rotation_count = swings.windows(2).filter(|w| w[0].kind != w[1].kind).count();

        let swing_bonus = (swings.len() as f64 * self.config.per_swing_bonus).min(self.config.max_swing_bonus);
        let confluent = swings.iter().filter(|s| s.pivot_confluence).count();
        let pivot_bonus = (confluent as f64 * self.config.pivot_bonus).min(self.config.max_pivot_bonus);
        let quality = (self.config.base_quality + swing_bonus + pivot_bonus).clamp(0.0, 100.0);

        tracing::debug!(
            "Swings: {} found, trend={}, quality={:.0}, rotations={}",
            swings.len(), trend, quality, rotation_count
        );

        SwingState { swings, last_high, last_low, trend, quality, rotation_count }
    }

    #[allow(clippy::too_many_arguments)]
    fn accept(
        &self,
        swings: &mut Vec<Swing>,
        index: usize,
        bar: &Bar,
        price: f64,
        kind: SwingKind,
        pivots: Option<&PivotLevels>,
        atr: f64,
    ) {
        let amplitude_pct = match swings.last() {
            Some(prev) if prev.price > 0.0 => (price - prev.price).abs() / prev.price * 100.0,
            Some(_) => 0.0,
            None => 0.0,
        };
        if !swings.is_empty() && amplitude_pct < self.config.min_move_pct {
            return;
        }

        let pivot_confluence = match pivots {
            Some(levels) if atr > 0.0 => levels
                .all()
                .any(|l| (l.value - price).abs() <= self.config.pivot_distance_atr * atr),
            _ => false,
        };

        swings.push(Swing {
            index,
            timestamp: bar.timestamp,
            price,
            kind,
            amplitude_pct,
            pivot_confluence,
        });
    }
}

impl Default for SwingDetector {
    fn default() -> Self {
        Self::new(SwingConfig::default())
    }
}

/// HH & HL => Up, LH & LL => Down, anything else Sideways
fn structure_trend(swings: &[Swing]) -> TrendDirection {
    let highs: Vec<f64> = swings.iter().filter(|s| s.kind == SwingKind::High).map(|s| s.price).collect();
    let lows: Vec<f64> = swings.iter().filter(|s| s.kind == SwingKind::Low).map(|s| s.price).collect();
    if highs.len() < 2 || lows.len() < 2 {
        return TrendDirection::Sideways;
    }

    let (h1, h2) = (highs[highs.len() - 2], highs[highs.len() - 1]);
    let (l1, l2) = (lows[lows.len() - 2], lows[lows.len() - 1]);

    if h2 > h1 && l2 > l1 {
        TrendDirection::Up
    } else if h2 < h1 && l2 < l1 {
        TrendDirection::Down
    } else {
        TrendDirection::Sideways
    }
}
