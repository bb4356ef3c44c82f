//! Market regime classification
//!
//! Three independent votes over a window of closes:
//! 1. ADX: trend strength, with +DI/-DI as directional bias
//! 2. OLS regression: slope as %/bar, gated by R²
//! 3. Hurst exponent (optional): persistence of returns
//!
//! TREND needs two trend votes. ADX alone still counts as a trend at reduced
//! confidence. A short primary and a longer secondary window are classified
//! and the more confident one is used. A fast EMA tag can override the
//! ensemble when price has clearly left it.

use serde::{Deserialize, Serialize};

use super::bars::Bar;
use super::indicators::{self, AdxReading, Regression};
use crate::types::{Direction, TrendDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegimeLabel {
    TrendUp,
    TrendDown,
    Range,
    Unknown,
}

impl RegimeLabel {
    pub fn from_direction(direction: TrendDirection) -> Self {
        match direction {
            TrendDirection::Up => RegimeLabel::TrendUp,
            TrendDirection::Down => RegimeLabel::TrendDown,
            TrendDirection::Sideways => RegimeLabel::Range,
        }
    }

    pub fn direction(&self) -> TrendDirection {
        match self {
            RegimeLabel::TrendUp => TrendDirection::Up,
            RegimeLabel::TrendDown => TrendDirection::Down,
            _ => TrendDirection::Sideways,
        }
    }

    pub fn is_trending(&self) -> bool {
        matches!(self, RegimeLabel::TrendUp | RegimeLabel::TrendDown)
    }
}

impl std::fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegimeLabel::TrendUp => write!(f, "TREND_UP"),
            RegimeLabel::TrendDown => write!(f, "TREND_DOWN"),
            RegimeLabel::Range => write!(f, "RANGE"),
            RegimeLabel::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteSource {
    Adx,
    Regression,
    Hurst,
}

/// One indicator's opinion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeVote {
    pub source: VoteSource,
    pub trend: bool,
    pub direction: TrendDirection,
    /// ADX, slope %/bar, or Hurst exponent
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeframeUsed {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendChange {
    ReversalUp,
    ReversalDown,
}

/// Ensemble result over a single window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRegime {
    pub label: RegimeLabel,
    pub confidence: f64,
    pub bars: usize,
    pub adx: AdxSnapshot,
    pub slope_pct: f64,
    pub r_squared: f64,
    pub hurst: Option<f64>,
    pub votes: Vec<RegimeVote>,
    /// Only ADX voted trend
    pub trend_priority: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AdxSnapshot {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

impl From<AdxReading> for AdxSnapshot {
    fn from(r: AdxReading) -> Self {
        Self { adx: r.adx, plus_di: r.plus_di, minus_di: r.minus_di }
    }
}

/// Price relative to the fast EMA
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FastTrendTag {
    pub direction: TrendDirection,
    pub ema: f64,
    /// (close - ema) / ema, percent
    pub distance_pct: f64,
    pub inside_band: bool,
    /// EMA change over the momentum lookback
    pub ema_slope: f64,
}

impl FastTrendTag {
    /// Outside the band with the EMA sloping the same way
    pub fn is_clear(&self) -> bool {
        !self.inside_band
            && match self.direction {
                TrendDirection::Up => self.ema_slope > 0.0,
                TrendDirection::Down => self.ema_slope < 0.0,
                TrendDirection::Sideways => false,
            }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub label: RegimeLabel,
    pub confidence: f64,
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
    pub slope_pct: f64,
    pub r_squared: f64,
    pub hurst: Option<f64>,
    pub votes: Vec<RegimeVote>,
    pub direction: TrendDirection,
    pub timeframe_used: TimeframeUsed,
    pub primary: Option<WindowRegime>,
    pub secondary: Option<WindowRegime>,
    pub trend_change: Option<TrendChange>,
    pub fast_trend: Option<FastTrendTag>,
    /// Label was set by the fast EMA tag rather than the ensemble
    pub ema_override: bool,
}

impl RegimeState {
    /// RANGE at zero confidence: not enough bars to say anything
    pub fn insufficient() -> Self {
        Self {
            label: RegimeLabel::Range,
            confidence: 0.0,
            adx: 0.0,
            plus_di: 0.0,
            minus_di: 0.0,
            slope_pct: 0.0,
            r_squared: 0.0,
            hurst: None,
            votes: Vec::new(),
            direction: TrendDirection::Sideways,
            timeframe_used: TimeframeUsed::Primary,
            primary: None,
            secondary: None,
            trend_change: None,
            fast_trend: None,
            ema_override: false,
        }
    }

    pub fn is_trending(&self) -> bool {
        self.label.is_trending()
    }

    /// Continuation trade direction, if trending
    pub fn trade_direction(&self) -> Option<Direction> {
        Direction::from_trend(self.direction)
    }

    fn from_window(window: &WindowRegime, used: TimeframeUsed) -> Self {
        Self {
            label: window.label,
            confidence: window.confidence,
            adx: window.adx.adx,
            plus_di: window.adx.plus_di,
            minus_di: window.adx.minus_di,
            slope_pct: window.slope_pct,
            r_squared: window.r_squared,
            hurst: window.hurst,
            votes: window.votes.clone(),
            direction: window.label.direction(),
            timeframe_used: used,
            primary: None,
            secondary: None,
            trend_change: None,
            fast_trend: None,
            ema_override: false,
        }
    }
}

/// Configuration for regime classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    pub adx_period: usize,
    /// ADX above this votes trend (default: 25)
    pub adx_threshold: f64,
    /// |slope| in %/bar (default: 0.02)
    pub slope_threshold_pct: f64,
    /// R² needed with the slope (default: 0.5)
    pub r_squared_threshold: f64,
    pub use_hurst: bool,
    /// Hurst above this votes trend (default: 0.5)
    pub hurst_threshold: f64,
    /// Smallest rescaled-range chunk (default: 8)
    pub hurst_min_chunk: usize,
    pub multi_timeframe: bool,
    /// Primary window in bars (default: 50)
    pub primary_window: usize,
    /// Secondary window in bars (default: 150)
    pub secondary_window: usize,
    /// Window result accepted at this confidence (default: 70)
    pub confidence_threshold: f64,
    /// Confidence when ADX alone says trend (default: 55)
    pub trend_priority_confidence: f64,
    /// Short / medium slope windows for the reversal check (default: 10 / 30)
    pub reversal_short: usize,
    pub reversal_medium: usize,
    /// Fast EMA period (default: 34)
    pub ema_period: usize,
    /// Band around the EMA treated as neutral, percent (default: 0.1)
    pub ema_band_pct: f64,
    /// Bars for the momentum tiebreak and EMA slope (default: 3)
    pub momentum_bars: usize,
    /// Momentum under this percent is flat (default: 0.05)
    pub momentum_min_pct: f64,
    /// Confidence after an EMA override (default: 65)
    pub ema_override_confidence: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            adx_period: 14,
            adx_threshold: 25.0,
            slope_threshold_pct: 0.02,
            r_squared_threshold: 0.5,
            use_hurst: true,
            hurst_threshold: 0.5,
            hurst_min_chunk: 8,
            multi_timeframe: true,
            primary_window: 50,
            secondary_window: 150,
            confidence_threshold: 70.0,
            trend_priority_confidence: 55.0,
            reversal_short: 10,
            reversal_medium: 30,
            ema_period: 34,
            ema_band_pct: 0.1,
            momentum_bars: 3,
            momentum_min_pct: 0.05,
            ema_override_confidence: 65.0,
        }
    }
}

pub struct RegimeClassifier {
    config: RegimeConfig,
}

impl RegimeClassifier {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Bars needed before any window can be classified
    pub fn min_bars(&self) -> usize {
        2 * self.config.adx_period + 1
    }

    pub fn detect(&self, bars: &[Bar]) -> RegimeState {
        let Some(primary) = self.classify_window(tail(bars, self.config.primary_window)) else {
            return RegimeState::insufficient();
        };

        let secondary = if self.config.multi_timeframe && bars.len() >= self.config.secondary_window {
            self.classify_window(tail(bars, self.config.secondary_window))
        } else {
            None
        };

        let threshold = self.config.confidence_threshold;
        let mut state = match &secondary {
            _ if primary.confidence >= threshold || !self.config.multi_timeframe => {
                RegimeState::from_window(&primary, TimeframeUsed::Primary)
            }
            Some(sec) if sec.confidence >= threshold => RegimeState::from_window(sec, TimeframeUsed::Secondary),
            _ => {
                let mut fallback = RegimeState::from_window(&primary, TimeframeUsed::Primary);
                fallback.trend_change = self.trend_change(bars);
                fallback
            }
        };
        state.primary = Some(primary);
        state.secondary = secondary;

        state.fast_trend = self.fast_trend(bars);
        if let Some(tag) = state.fast_trend {
            let disagrees = state.label.is_trending() && state.direction != tag.direction;
            if tag.is_clear() && (state.label == RegimeLabel::Range || disagrees) {
                tracing::debug!(
                    "EMA{} override: {} -> {} (dist={:.3}%)",
                    self.config.ema_period, state.label, RegimeLabel::from_direction(tag.direction),
                    tag.distance_pct
                );
                state.label = RegimeLabel::from_direction(tag.direction);
                state.direction = tag.direction;
                state.confidence = self.config.ema_override_confidence;
                state.ema_override = true;
            }
        }

        tracing::debug!(
            "Regime {} conf={:.0} adx={:.1} slope={:.4}%/bar r2={:.2} used={:?}",
            state.label, state.confidence, state.adx, state.slope_pct, state.r_squared, state.timeframe_used
        );
        state
    }

    /// Ensemble vote over one window; `None` when the window is too short
    pub fn classify_window(&self, bars: &[Bar]) -> Option<WindowRegime> {
        if bars.len() < self.min_bars() {
            return None;
        }
        let cfg = &self.config;
        let closes = indicators::closes(bars);

        let adx = indicators::adx(bars, cfg.adx_period).map(AdxSnapshot::from)?;
        let di_bias = if adx.plus_di > adx.minus_di {
            TrendDirection::Up
        } else if adx.minus_di > adx.plus_di {
            TrendDirection::Down
        } else {
            TrendDirection::Sideways
        };
        let adx_vote = RegimeVote {
            source: VoteSource::Adx,
            trend: adx.adx > cfg.adx_threshold,
            direction: di_bias,
            value: adx.adx,
        };

        let Some(reg) = indicators::linear_regression(&closes) else {
            return Some(self.unknown_window(bars.len(), adx));
        };
        let reg_vote = self.regression_vote(&reg);

        let hurst = if cfg.use_hurst {
            indicators::hurst_exponent(&closes, cfg.hurst_min_chunk)
        } else {
            None
        };
        let hurst_vote = hurst.map(|h| RegimeVote {
            source: VoteSource::Hurst,
            trend: h > cfg.hurst_threshold,
            direction: reg_vote.direction,
            value: h,
        });

        let votes: Vec<RegimeVote> = [Some(adx_vote), Some(reg_vote), hurst_vote].into_iter().flatten().collect();
        let total = votes.len() as f64;
        let trend_votes = votes.iter().filter(|v| v.trend).count();

        let (label, confidence, trend_priority) = if trend_votes >= 2 {
            let direction = if reg_vote.trend { reg_vote.direction } else { di_bias };
            let label = match direction {
                TrendDirection::Sideways => RegimeLabel::Unknown,
                d => RegimeLabel::from_direction(d),
            };
            (label, trend_votes as f64 / total * 100.0, false)
        } else if trend_votes == 1 && adx_vote.trend && di_bias.is_directional() {
            (RegimeLabel::from_direction(di_bias), cfg.trend_priority_confidence, true)
        } else {
            let range_votes = votes.len() - trend_votes;
            (RegimeLabel::Range, range_votes as f64 / total * 100.0, false)
        };

        Some(WindowRegime {
            label,
            confidence,
            bars: bars.len(),
            adx,
            slope_pct: reg.slope_pct,
            r_squared: reg.r_squared,
            hurst,
            votes,
            trend_priority,
        })
    }

    fn regression_vote(&self, reg: &Regression) -> RegimeVote {
        let cfg = &self.config;
        let magnitude = reg.slope_pct.abs();
        let fitted = magnitude > cfg.slope_threshold_pct && reg.r_squared > cfg.r_squared_threshold;
        let steep = magnitude >= 2.0 * cfg.slope_threshold_pct;
        let trend = fitted || steep;
        let direction = if !trend {
            TrendDirection::Sideways
        } else if reg.slope_pct > 0.0 {
            TrendDirection::Up
        } else {
            TrendDirection::Down
        };
        RegimeVote {
            source: VoteSource::Regression,
            trend,
            direction,
            value: reg.slope_pct,
        }
    }

    fn unknown_window(&self, bars: usize, adx: AdxSnapshot) -> WindowRegime {
        WindowRegime {
            label: RegimeLabel::Unknown,
            confidence: 0.0,
            bars,
            adx,
            slope_pct: 0.0,
            r_squared: 0.0,
            hurst: None,
            votes: Vec::new(),
            trend_priority: false,
        }
    }

    /// Short vs medium slope disagreement
    pub fn trend_change(&self, bars: &[Bar]) -> Option<TrendChange> {
        let cfg = &self.config;
        if bars.len() < cfg.reversal_medium {
            return None;
        }
        let short = indicators::linear_regression(&indicators::closes(tail(bars, cfg.reversal_short)))?;
        let medium = indicators::linear_regression(&indicators::closes(tail(bars, cfg.reversal_medium)))?;
        let threshold = cfg.slope_threshold_pct;
        if short.slope_pct.abs() < threshold || medium.slope_pct.abs() < threshold {
            return None;
        }
        if short.slope_pct > 0.0 && medium.slope_pct < 0.0 {
            Some(TrendChange::ReversalUp)
        } else if short.slope_pct < 0.0 && medium.slope_pct > 0.0 {
            Some(TrendChange::ReversalDown)
        } else {
            None
        }
    }

    /// Price vs EMA with a neutral band and a momentum tiebreak inside it
    pub fn fast_trend(&self, bars: &[Bar]) -> Option<FastTrendTag> {
        let cfg = &self.config;
        let closes = indicators::closes(bars);
        let series = indicators::ema_series(&closes, cfg.ema_period);
        let lookback = cfg.momentum_bars.max(1);
        if series.len() <= lookback {
            return None;
        }
        let ema = series[series.len() - 1];
        let ema_slope = ema - series[series.len() - 1 - lookback];
        let close = closes[closes.len() - 1];
        if ema <= 0.0 {
            return None;
        }
        let distance_pct = (close - ema) / ema * 100.0;
        let inside_band = distance_pct.abs() <= cfg.ema_band_pct;

        let direction = if !inside_band {
            if distance_pct > 0.0 { TrendDirection::Up } else { TrendDirection::Down }
        } else {
            let past = closes[closes.len() - 1 - lookback];
            let momentum = if past > 0.0 { (close - past) / past * 100.0 } else { 0.0 };
            if momentum.abs() < cfg.momentum_min_pct {
                TrendDirection::Sideways
            } else if momentum > 0.0 {
                TrendDirection::Up
            } else {
                TrendDirection::Down
            }
        };

        Some(FastTrendTag { direction, ema, distance_pct, inside_band, ema_slope })
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new(RegimeConfig::default())
    }
}

fn tail(bars: &[Bar], n: usize) -> &[Bar] {
    &bars[bars.len().saturating_sub(n)..]
}
