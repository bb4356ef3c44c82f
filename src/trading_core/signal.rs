//! Signal and rejection types produced by the signal detector

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::candles::PatternKind;
use super::diagnostics::Measurements;
use super::microstructure::MicrostructureSummary;
use super::pullback::PullbackZoneState;
use super::regime::{RegimeLabel, RegimeState};
use super::swings::SwingState;
use crate::error::{CoreError, CoreResult};
use crate::types::{Direction, TrendDirection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSource {
    Pullback,
    Pattern,
}

/// Close beyond a prior swing level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructureBreak {
    pub direction: Direction,
    pub level: f64,
    /// Broke earlier, came back to the level and held
    pub retest: bool,
    pub volume_zscore: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    pub label: RegimeLabel,
    pub confidence: f64,
    pub adx: f64,
    pub direction: TrendDirection,
    pub ema_override: bool,
}

impl From<&RegimeState> for RegimeSnapshot {
    fn from(r: &RegimeState) -> Self {
        Self {
            label: r.label,
            confidence: r.confidence,
            adx: r.adx,
            direction: r.direction,
            ema_override: r.ema_override,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingSnapshot {
    pub trend: TrendDirection,
    pub quality: f64,
    pub rotation_count: usize,
    pub last_high: Option<f64>,
    pub last_low: Option<f64>,
}

impl From<&SwingState> for SwingSnapshot {
    fn from(s: &SwingState) -> Self {
        Self {
            trend: s.trend,
            quality: s.quality,
            rotation_count: s.rotation_count,
            last_high: s.last_high.as_ref().map(|h| h.price),
            last_low: s.last_low.as_ref().map(|l| l.price),
        }
    }
}

/// A fully specified trade decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub quality: f64,
    pub confidence: f64,
    pub risk_reward: f64,
    pub atr: f64,
    pub source: SignalSource,
    pub patterns: Vec<PatternKind>,
    pub structure_break: Option<StructureBreak>,
    pub reason: String,
    pub regime: RegimeSnapshot,
    pub swing: SwingSnapshot,
    pub microstructure: Option<MicrostructureSummary>,
}

impl TradingSignal {
    pub fn risk(&self) -> f64 {
        (self.entry - self.stop).abs()
    }

    pub fn reward(&self) -> f64 {
        (self.target - self.entry).abs()
    }

    /// Stop must sit behind entry and target in front of it
    pub fn check_sides(&self) -> CoreResult<()> {
        let sign = self.direction.sign();
        if (self.entry - self.stop) * sign <= 0.0 {
            return Err(CoreError::InvalidInput { field: "stop", value: self.stop });
        }
        if (self.target - self.entry) * sign <= 0.0 {
            return Err(CoreError::InvalidInput { field: "target", value: self.target });
        }
        Ok(())
    }
}

impl std::fmt::Display for TradingSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} @ {:.5} stop {:.5} target {:.5} (risk {:.5}, R:R {:.2}, q={:.0}, c={:.0})",
            self.direction, self.symbol, self.entry, self.stop, self.target,
            self.risk(), self.risk_reward, self.quality, self.confidence
        )
    }
}

pub(crate) fn trend_code(t: TrendDirection) -> f64 {
    match t {
        TrendDirection::Up => 1.0,
        TrendDirection::Down => -1.0,
        TrendDirection::Sideways => 0.0,
    }
}

/// Why the detector produced no signal. Each variant carries the values
/// that decided it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rejection {
    InsufficientBars { bars: usize, required: usize },
    Cooldown { bars_since: usize, required: usize },
    TrendMisaligned { regime: TrendDirection, fast_trend: Option<TrendDirection> },
    LowSwingQuality { quality: f64, floor: f64, adx: f64 },
    OutsidePullbackZone { zone: PullbackZoneState },
    NoSetup { patterns: usize, breaks: usize },
    LowLiquidity { score: f64, floor: f64 },
    ExtremeVolatility { atr_ratio: f64, max: f64 },
    DirectionTie { long: usize, short: usize },
    CounterTrend { direction: Direction, trend: TrendDirection },
    /// At or beyond the last swing extreme in the trade direction
    SwingExtreme { direction: Direction, price: f64, extreme: f64, distance_atr: f64, tolerance_atr: f64 },
    /// Current bar is extending the pullback, not reversing it
    ExtendingAgainst { direction: Direction, bar_extreme: f64, prior_extreme: f64, close_location: f64 },
    /// Ranging market: buying the range high or selling the range low
    RangeExtreme { direction: Direction, price: f64, extreme: f64 },
    RiskReward { risk_reward: f64, min: f64 },
    QualityFloor { quality: f64, floor: f64 },
    ConfidenceFloor { confidence: f64, floor: f64 },
}

impl Rejection {
    /// Gate that produced the rejection
    pub fn gate(&self) -> &'static str {
        match self {
            Rejection::InsufficientBars { .. } => "min_bars",
            Rejection::Cooldown { .. } => "cooldown",
            Rejection::TrendMisaligned { .. } => "trend_alignment",
            Rejection::LowSwingQuality { .. } => "swing_quality",
            Rejection::OutsidePullbackZone { .. } => "pullback_zone",
            Rejection::NoSetup { .. } => "patterns",
            Rejection::LowLiquidity { .. } => "liquidity",
            Rejection::ExtremeVolatility { .. } => "atr_ratio",
            Rejection::DirectionTie { .. } => "direction",
            Rejection::CounterTrend { .. } | Rejection::RangeExtreme { .. } => "trend_filter",
            Rejection::SwingExtreme { .. } | Rejection::ExtendingAgainst { .. } => "swing_extreme",
            Rejection::RiskReward { .. } => "risk_reward",
            Rejection::QualityFloor { .. } => "quality",
            Rejection::ConfidenceFloor { .. } => "confidence",
        }
    }

    pub fn measurements(&self) -> Measurements {
        let m = Measurements::new();
        match *self {
            Rejection::InsufficientBars { bars, required } => {
                m.with("bars", bars as f64).with("required", required as f64)
            }
            Rejection::Cooldown { bars_since, required } => {
                m.with("bars_since", bars_since as f64).with("required", required as f64)
            }
            Rejection::TrendMisaligned { regime, fast_trend } => m
                .with("regime", trend_code(regime))
                .with("fast_trend", fast_trend.map(trend_code).unwrap_or(f64::NAN)),
            Rejection::LowSwingQuality { quality, floor, adx } => {
                m.with("quality", quality).with("floor", floor).with("adx", adx)
            }
            Rejection::OutsidePullbackZone { zone } => {
                m.with("retracement", zone.retracement().unwrap_or(f64::NAN))
            }
            Rejection::NoSetup { patterns, breaks } => {
                m.with("patterns", patterns as f64).with("breaks", breaks as f64)
            }
            Rejection::LowLiquidity { score, floor } => m.with("liquidity", score).with("floor", floor),
            Rejection::ExtremeVolatility { atr_ratio, max } => m.with("atr_ratio", atr_ratio).with("max", max),
            Rejection::DirectionTie { long, short } => m.with("long", long as f64).with("short", short as f64),
            Rejection::CounterTrend { direction, trend } => {
                m.with("direction", direction.sign()).with("trend", trend_code(trend))
            }
            Rejection::SwingExtreme { direction, price, extreme, distance_atr, tolerance_atr } => m
                .with("direction", direction.sign())
                .with("price", price)
                .with("extreme", extreme)
                .with("distance_atr", distance_atr)
                .with("tolerance_atr", tolerance_atr),
            Rejection::ExtendingAgainst { direction, bar_extreme, prior_extreme, close_location } => m
                .with("direction", direction.sign())
                .with("bar_extreme", bar_extreme)
                .with("prior_extreme", prior_extreme)
                .with("close_location", close_location),
            Rejection::RangeExtreme { direction, price, extreme } => m
                .with("direction", direction.sign())
                .with("price", price)
                .with("extreme", extreme),
            Rejection::RiskReward { risk_reward, min } => m.with("risk_reward", risk_reward).with("min", min),
            Rejection::QualityFloor { quality, floor } => m.with("quality", quality).with("floor", floor),
            Rejection::ConfidenceFloor { confidence, floor } => {
                m.with("confidence", confidence).with("floor", floor)
            }
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.gate(), self.measurements())
    }
}

/// Result of one detector cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Zero or one signal
    pub signals: Vec<TradingSignal>,
    pub rejection: Option<Rejection>,
}

impl Detection {
    pub fn rejected(rejection: Rejection) -> Self {
        Self { signals: Vec::new(), rejection: Some(rejection) }
    }

    pub fn emitted(signal: TradingSignal) -> Self {
        Self { signals: vec![signal], rejection: None }
    }

    pub fn signal(&self) -> Option<&TradingSignal> {
        self.signals.first()
    }
}
