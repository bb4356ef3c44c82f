//! Signal detector: the gate cascade that turns structure into trades
//!
//! Every bar is run through the gates in order. The first failing gate ends
//! the cycle with a typed `Rejection`; a bar that clears them all yields one
//! `TradingSignal`.
//!
//! 1. Minimum bars
//! 2. Cooldown since the last emitted signal
//! 3. Regime and fast EMA tag agree on a directional trend (togglable)
//! 4. Swing quality floor, waived in strong trends
//! 5. Pullback path: a pullback opportunity becomes the signal directly
//! 6. Pattern path: candle patterns and swing breaks (in the pullback zone
//!    when trending)
//! 7. Liquidity and volatility
//! 8. Majority direction
//! 9. Stop distance
//! 10. Target distance
//! 11. Trend filter and swing-extreme check
//! 12. Risk:reward
//! 13. Quality and confidence floors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bars::Bar;
use super::candles::{self, CandleConfig, CandlePattern};
use super::diagnostics::{Diagnostics, GateVerdict, Measurements};
use super::indicators;
use super::microstructure::MicrostructureSummary;
use super::pivots::{LevelSide, PivotLevels};
use super::pullback::{PullbackDetector, PullbackLeg, PullbackOpportunity, PullbackZoneState};
use super::regime::RegimeState;
use super::signal::{
    trend_code, Detection, RegimeSnapshot, Rejection, SignalSource, StructureBreak, SwingSnapshot, TradingSignal,
};
use super::swings::{SwingKind, SwingState};
use crate::config::InstrumentProfile;
use crate::error::{CoreError, CoreResult};
use crate::types::Direction;

/// Configuration for the signal detector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_bars: usize,
    /// Bars that must close after a signal before the next one
    pub cooldown_bars: usize,
    /// Regime and fast EMA tag must both show the same trend. Off lets
    /// ranging markets through to the pattern path.
    pub strict_alignment: bool,
    pub min_swing_quality: f64,
    /// ADX at which the swing quality floor is waived
    pub strong_trend_adx: f64,

    /// Pullback path: stop and target in ATRs from entry
    pub pullback_stop_atr: f64,
    pub pullback_target_atr: f64,
    /// Pullback path: stop at least this far beyond the pullback extreme
    pub pullback_stop_buffer_atr: f64,

    /// Pattern path: retracement window when trending, percent
    pub zone_min_pct: f64,
    pub zone_max_pct: f64,

    /// Fresh breaks need this volume z-score
    pub breakout_volume_zscore: f64,
    /// Consecutive closes in the break direction
    pub confirm_bars: usize,
    /// Net move over `momentum_bars` at least `momentum_atr` ATRs
    pub momentum_bars: usize,
    pub momentum_atr: f64,
    /// Bars searched for an earlier break of the same level
    pub retest_lookback: usize,
    pub retest_tolerance_atr: f64,

    pub min_liquidity: f64,
    pub max_atr_ratio: f64,

    /// ATR as percent of price below which the low / mid stop tier applies
    pub low_vol_atr_pct: f64,
    pub mid_vol_atr_pct: f64,
    pub stop_atr_low_vol: f64,
    pub stop_atr_mid_vol: f64,
    pub stop_atr_high_vol: f64,
    pub trend_stop_mult: f64,
    pub range_stop_mult: f64,
    pub min_stop_atr: f64,
    pub max_stop_atr: f64,
    /// Swing stop replaces the computed one within this band of it
    pub natural_stop_min: f64,
    pub natural_stop_max: f64,

    pub base_risk_reward: f64,
    pub min_risk_reward: f64,
    /// Pivot target only if at least this many stop distances away
    pub pivot_target_min_stop: f64,

    /// Too close to the swing extreme, in ATRs
    pub extreme_tolerance_atr: f64,
    /// Bars checked for an extending bar / range extreme
    pub extreme_lookback: usize,

    pub min_quality: f64,
    pub min_confidence: f64,
    pub atr_period: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_bars: 20,
            cooldown_bars: 3,
            strict_alignment: true,
            min_swing_quality: 50.0,
            strong_trend_adx: 35.0,
            pullback_stop_atr: 2.0,
            pullback_target_atr: 4.0,
            pullback_stop_buffer_atr: 0.1,
            zone_min_pct: 23.6,
            zone_max_pct: 78.6,
            breakout_volume_zscore: 1.0,
            confirm_bars: 2,
            momentum_bars: 3,
            momentum_atr: 0.5,
            retest_lookback: 10,
            retest_tolerance_atr: 0.3,
            min_liquidity: 0.3,
            max_atr_ratio: 2.0,
            low_vol_atr_pct: 0.15,
            mid_vol_atr_pct: 0.5,
            stop_atr_low_vol: 1.8,  // quiet market: give it room
            stop_atr_mid_vol: 1.5,
            stop_atr_high_vol: 1.2,
            trend_stop_mult: 1.15,
            range_stop_mult: 0.9,
            min_stop_atr: 1.0,
            max_stop_atr: 3.0,
            natural_stop_min: 0.5,
            natural_stop_max: 1.5,
            base_risk_reward: 2.0,
            min_risk_reward: 1.5,
            pivot_target_min_stop: 1.5,
            extreme_tolerance_atr: 0.3,
            extreme_lookback: 10,
            min_quality: 60.0,
            min_confidence: 60.0,
            atr_period: 14,
        }
    }
}

/// Gate cascade for one instrument. Cloning gives an independent detector
/// with the same cooldown state.
#[derive(Debug, Clone)]
pub struct SignalDetector {
    profile: InstrumentProfile,
    config: DetectorConfig,
    pullback: PullbackDetector,
    candles: CandleConfig,
    last_signal_time: Option<DateTime<Utc>>,
}

impl SignalDetector {
    pub fn new(
        profile: InstrumentProfile,
        config: DetectorConfig,
        pullback: PullbackDetector,
        candles: CandleConfig,
    ) -> Self {
        Self {
            profile,
            config,
            pullback,
            candles,
            last_signal_time: None,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn last_signal_time(&self) -> Option<DateTime<Utc>> {
        self.last_signal_time
    }

    /// Run the cascade on the latest bar. Errors only when the inputs cannot
    /// be evaluated; a rejected setup is an `Ok` detection without signals.
    pub fn detect(
        &mut self,
        bars: &[Bar],
        regime: &RegimeState,
        swings: &SwingState,
        pivots: &PivotLevels,
        micro: Option<&MicrostructureSummary>,
        diagnostics: &dyn Diagnostics,
    ) -> CoreResult<Detection> {
        match self.evaluate(bars, regime, swings, pivots, micro, diagnostics)? {
            Ok(signal) => {
                self.last_signal_time = Some(signal.timestamp);
                diagnostics.record(
                    "emit",
                    GateVerdict::Pass,
                    &Measurements::new()
                        .with("entry", signal.entry)
                        .with("stop", signal.stop)
                        .with("target", signal.target)
                        .with("quality", signal.quality)
                        .with("confidence", signal.confidence),
                );
                tracing::info!("SIGNAL {} [{}]", signal, signal.reason);
                Ok(Detection::emitted(signal))
            }
            Err(rejection) => {
                diagnostics.record(rejection.gate(), GateVerdict::Reject, &rejection.measurements());
                Ok(Detection::rejected(rejection))
            }
        }
    }

    fn evaluate(
        &self,
        bars: &[Bar],
        regime: &RegimeState,
        swings: &SwingState,
        pivots: &PivotLevels,
        micro: Option<&MicrostructureSummary>,
        diagnostics: &dyn Diagnostics,
    ) -> CoreResult<Result<TradingSignal, Rejection>> {
        let cfg = &self.config;

        if bars.len() < cfg.min_bars.max(2) {
            return Ok(Err(Rejection::InsufficientBars { bars: bars.len(), required: cfg.min_bars.max(2) }));
        }
        passed(
            diagnostics,
            "min_bars",
            Measurements::new()
                .with("bars", bars.len() as f64)
                .with("required", cfg.min_bars.max(2) as f64),
        );
        let current = &bars[bars.len() - 1];
        current.validate()?;

        let atr = indicators::atr(bars, cfg.atr_period);
        if !atr.is_finite() || atr <= 0.0 {
            return Err(CoreError::InvalidInput { field: "atr", value: atr });
        }

        let bars_since = self
            .last_signal_time
            .map(|last| bars.iter().filter(|b| b.timestamp > last).count());
        if let Some(bars_since) = bars_since.filter(|b| *b < cfg.cooldown_bars) {
            return Ok(Err(Rejection::Cooldown { bars_since, required: cfg.cooldown_bars }));
        }
        passed(
            diagnostics,
            "cooldown",
            Measurements::new()
                .with("bars_since", bars_since.map_or(f64::NAN, |b| b as f64))
                .with("required", cfg.cooldown_bars as f64),
        );

        let fast_trend = regime.fast_trend.map(|t| t.direction);
        if cfg.strict_alignment && (!regime.direction.is_directional() || fast_trend != Some(regime.direction)) {
            return Ok(Err(Rejection::TrendMisaligned { regime: regime.direction, fast_trend }));
        }
        passed(
            diagnostics,
            "trend_alignment",
            Measurements::new()
                .with("regime", trend_code(regime.direction))
                .with("fast_trend", fast_trend.map(trend_code).unwrap_or(f64::NAN))
                .with("strict", if cfg.strict_alignment { 1.0 } else { 0.0 }),
        );

        if swings.quality < cfg.min_swing_quality && regime.adx < cfg.strong_trend_adx {
            return Ok(Err(Rejection::LowSwingQuality {
                quality: swings.quality,
                floor: cfg.min_swing_quality,
                adx: regime.adx,
            }));
        }
        passed(
            diagnostics,
            "swing_quality",
            Measurements::new()
                .with("quality", swings.quality)
                .with("floor", cfg.min_swing_quality)
                .with("adx", regime.adx)
                .with("regime_confidence", regime.confidence),
        );

        if let Some(opp) = self.pullback.detect(bars, regime, swings, pivots, micro) {
            let signal = match self.pullback_signal(bars, &opp, regime, swings, micro, atr, diagnostics) {
                Ok(signal) => signal,
                Err(rejection) => return Ok(Err(rejection)),
            };
            signal.check_sides()?;
            return Ok(Ok(signal));
        }

        let signal = match self.pattern_signal(bars, regime, swings, pivots, micro, atr, diagnostics) {
            Ok(signal) => signal,
            Err(rejection) => return Ok(Err(rejection)),
        };
        signal.check_sides()?;
        Ok(Ok(signal))
    }

    /// Gate 5: a pullback opportunity with ATR-based stop and target
    #[allow(clippy::too_many_arguments)]
    fn pullback_signal(
        &self,
        bars: &[Bar],
        opp: &PullbackOpportunity,
        regime: &RegimeState,
        swings: &SwingState,
        micro: Option<&MicrostructureSummary>,
        atr: f64,
        diagnostics: &dyn Diagnostics,
    ) -> Result<TradingSignal, Rejection> {
        let cfg = &self.config;
        let Some(direction) = opp.trade_direction() else {
            return Err(Rejection::NoSetup { patterns: 0, breaks: 0 });
        };
        let entry = opp.entry_price;
        let stop = match direction {
            Direction::Long => {
                (entry - cfg.pullback_stop_atr * atr).min(opp.pullback_extreme - cfg.pullback_stop_buffer_atr * atr)
            }
            Direction::Short => {
                (entry + cfg.pullback_stop_atr * atr).max(opp.pullback_extreme + cfg.pullback_stop_buffer_atr * atr)
            }
        };
        let target = entry + direction.sign() * cfg.pullback_target_atr * atr;

        self.check_swing_extreme(bars, swings, direction, atr, diagnostics)?;

        let risk_reward = (target - entry).abs() / (entry - stop).abs();
        self.check_risk_reward(risk_reward, diagnostics)?;

        let quality = opp.quality.min(95.0);
        self.check_quality(quality, diagnostics)?;

        let mut confidence: f64 = 60.0;
        if opp.reversal.is_some() {
            confidence += 10.0;
        }
        if regime.direction.matches(direction) {
            confidence += 10.0;
        }
        confidence += microstructure_bonus(micro, direction);
        let confidence = confidence.min(90.0);
        self.check_confidence(confidence, diagnostics)?;

        Ok(TradingSignal {
            symbol: self.profile.symbol.clone(),
            timestamp: bars[bars.len() - 1].timestamp,
            direction,
            entry,
            stop,
            target,
            quality,
            confidence,
            risk_reward,
            atr,
            source: SignalSource::Pullback,
            patterns: opp.reversal.map(|p| p.kind).into_iter().collect(),
            structure_break: None,
            reason: opp.reason.clone(),
            regime: RegimeSnapshot::from(regime),
            swing: SwingSnapshot::from(swings),
            microstructure: micro.cloned(),
        })
    }

    /// Gates 6 to 13
    #[allow(clippy::too_many_arguments)]
    fn pattern_signal(
        &self,
        bars: &[Bar],
        regime: &RegimeState,
        swings: &SwingState,
        pivots: &PivotLevels,
        micro: Option<&MicrostructureSummary>,
        atr: f64,
        diagnostics: &dyn Diagnostics,
    ) -> Result<TradingSignal, Rejection> {
        let cfg = &self.config;
        let current = &bars[bars.len() - 1];

        if let Some(trend) = regime.trade_direction().filter(|_| regime.is_trending()) {
            let leg = PullbackLeg::measure(bars, swings, trend, self.pullback.config().origin_lookback);
            let zone = PullbackZoneState::classify(leg.as_ref(), cfg.zone_min_pct, cfg.zone_max_pct);
            if !zone.is_in_zone() {
                return Err(Rejection::OutsidePullbackZone { zone });
            }
            passed(
                diagnostics,
                "pullback_zone",
                Measurements::new().with("retracement", zone.retracement().unwrap_or(f64::NAN)),
            );
        }

        let patterns = candles::entry_patterns(bars, atr, &self.candles);
        let breaks: Vec<StructureBreak> = [Direction::Long, Direction::Short]
            .into_iter()
            .filter_map(|d| self.structure_break(bars, swings, micro, atr, d, diagnostics))
            .collect();
        if patterns.is_empty() && breaks.is_empty() {
            return Err(Rejection::NoSetup { patterns: 0, breaks: 0 });
        }
        passed(
            diagnostics,
            "patterns",
            Measurements::new()
                .with("patterns", patterns.len() as f64)
                .with("breaks", breaks.len() as f64),
        );

        if let Some(m) = micro {
            if m.liquidity_score < cfg.min_liquidity {
                return Err(Rejection::LowLiquidity { score: m.liquidity_score, floor: cfg.min_liquidity });
            }
            passed(
                diagnostics,
                "liquidity",
                Measurements::new().with("liquidity", m.liquidity_score).with("floor", cfg.min_liquidity),
            );
            if m.atr_ratio > cfg.max_atr_ratio {
                return Err(Rejection::ExtremeVolatility { atr_ratio: m.atr_ratio, max: cfg.max_atr_ratio });
            }
            passed(
                diagnostics,
                "atr_ratio",
                Measurements::new().with("atr_ratio", m.atr_ratio).with("max", cfg.max_atr_ratio),
            );
        }

        let votes = |d: Direction| {
            patterns.iter().filter(|p| p.direction == d).count() + breaks.iter().filter(|b| b.direction == d).count()
        };
        let (long, short) = (votes(Direction::Long), votes(Direction::Short));
        let direction = match long.cmp(&short) {
            std::cmp::Ordering::Greater => Direction::Long,
            std::cmp::Ordering::Less => Direction::Short,
            std::cmp::Ordering::Equal => return Err(Rejection::DirectionTie { long, short }),
        };
        passed(
            diagnostics,
            "direction",
            Measurements::new().with("long", long as f64).with("short", short as f64),
        );
        let agreeing: Vec<CandlePattern> = patterns.iter().copied().filter(|p| p.direction == direction).collect();
        let structure_break = breaks.iter().copied().find(|b| b.direction == direction);
        let confluence = long.max(short);

        let entry = current.close;
        let stop_distance = self.stop_distance(regime, swings, micro, direction, entry, atr);

        let rr_mult = if confluence >= 3 {
            1.25
        } else if confluence == 1 {
            0.85
        } else {
            1.0
        };
        let planned_rr = (cfg.base_risk_reward * rr_mult).max(cfg.min_risk_reward);
        let mut target_distance = stop_distance * planned_rr;
        let side = match direction {
            Direction::Long => LevelSide::Above,
            Direction::Short => LevelSide::Below,
        };
        if let Some(level) = pivots.nearest(entry, side) {
            let distance = (level.value - entry).abs();
            if distance > cfg.pivot_target_min_stop * stop_distance && distance < target_distance {
                target_distance = distance;
            }
        }

        if regime.is_trending() {
            if !regime.direction.matches(direction) {
                return Err(Rejection::CounterTrend { direction, trend: regime.direction });
            }
            passed(
                diagnostics,
                "trend_filter",
                Measurements::new()
                    .with("direction", direction.sign())
                    .with("trend", trend_code(regime.direction)),
            );
            self.check_swing_extreme(bars, swings, direction, atr, diagnostics)?;
        } else {
            // Range extreme over the bars before this one
            let n = bars.len();
            let recent = &bars[(n - 1).saturating_sub(cfg.extreme_lookback.max(1))..n - 1];
            let tolerance = cfg.extreme_tolerance_atr * atr;
            let at_extreme = match direction {
                Direction::Long => {
                    let high = indicators::highest_high(recent);
                    (entry >= high - tolerance).then_some(high)
                }
                Direction::Short => {
                    let low = indicators::lowest_low(recent);
                    (entry <= low + tolerance).then_some(low)
                }
            };
            if let Some(extreme) = at_extreme {
                return Err(Rejection::RangeExtreme { direction, price: entry, extreme });
            }
            passed(
                diagnostics,
                "trend_filter",
                Measurements::new()
                    .with("direction", direction.sign())
                    .with("trend", trend_code(regime.direction))
                    .with("price", entry),
            );
        }

        let risk_reward = target_distance / stop_distance;
        self.check_risk_reward(risk_reward, diagnostics)?;

        let mut quality: f64 = 60.0;
        if swings.quality >= 80.0 {
            quality += 10.0;
        } else if swings.quality >= 65.0 {
            quality += 5.0;
        }
        if let Some(level) = pivots.confluence(entry, 0.5).first() {
            quality += match level.strength {
                4 => 10.0,
                3 => 8.0,
                2 => 5.0,
                _ => 3.0,
            };
        }
        if risk_reward >= 2.0 {
            quality += 5.0;
        }
        if structure_break.is_some_and(|b| b.retest) {
            quality += 10.0;
        }
        let quality = quality.min(95.0);
        self.check_quality(quality, diagnostics)?;

        let mut confidence: f64 = 60.0;
        confidence += agreeing.iter().map(|p| p.strength * 10.0).sum::<f64>().min(15.0);
        if structure_break.is_some() {
            confidence += 10.0;
        }
        if regime.direction.matches(direction) {
            confidence += 10.0;
        }
        confidence += microstructure_bonus(micro, direction);
        let confidence = confidence.min(90.0);
        self.check_confidence(confidence, diagnostics)?;

        let mut reason: Vec<String> = agreeing.iter().map(|p| p.kind.to_string()).collect();
        if let Some(b) = structure_break {
            reason.push(format!("{} {:.5}", if b.retest { "retest of" } else { "break of" }, b.level));
        }

        let sign = direction.sign();
        Ok(TradingSignal {
            symbol: self.profile.symbol.clone(),
            timestamp: current.timestamp,
            direction,
            entry,
            stop: entry - sign * stop_distance,
            target: entry + sign * target_distance,
            quality,
            confidence,
            risk_reward,
            atr,
            source: SignalSource::Pattern,
            patterns: agreeing.iter().map(|p| p.kind).collect(),
            structure_break,
            reason: format!("{} in {}", reason.join(", "), regime.label),
            regime: RegimeSnapshot::from(regime),
            swing: SwingSnapshot::from(swings),
            microstructure: micro.cloned(),
        })
    }

    /// Close beyond the last swing level before this bar. A fresh break needs
    /// volume plus close-to-close and momentum confirmation; a retest needs a
    /// return to the level and a bar in the break direction.
    fn structure_break(
        &self,
        bars: &[Bar],
        swings: &SwingState,
        micro: Option<&MicrostructureSummary>,
        atr: f64,
        direction: Direction,
        diagnostics: &dyn Diagnostics,
    ) -> Option<StructureBreak> {
        let cfg = &self.config;
        let n = bars.len();
        if n < 2 {
            return None;
        }
        let current = &bars[n - 1];
        let sign = direction.sign();
        let kind = match direction {
            Direction::Long => SwingKind::High,
            Direction::Short => SwingKind::Low,
        };
        let level = swings.last_before(kind, n - 1)?.price;
        if (current.close - level) * sign <= 0.0 {
            return None;
        }
        let volume_zscore = micro.map_or(0.0, |m| m.volume_zscore);

        let recent = &bars[(n - 1).saturating_sub(cfg.retest_lookback)..n - 1];
        if let Some(first) = recent.iter().position(|b| (b.close - level) * sign > 0.0) {
            let tolerance = cfg.retest_tolerance_atr * atr;
            let came_back = recent[first + 1..].iter().any(|b| match direction {
                Direction::Long => b.low <= level + tolerance,
                Direction::Short => b.high >= level - tolerance,
            });
            let holds = match direction {
                Direction::Long => current.is_bullish(),
                Direction::Short => current.is_bearish(),
            };
            return (came_back && holds).then_some(StructureBreak { direction, level, retest: true, volume_zscore });
        }

        let fields = Measurements::new()
            .with("direction", sign)
            .with("level", level)
            .with("volume_zscore", volume_zscore);
        if volume_zscore < cfg.breakout_volume_zscore {
            diagnostics.record(
                "breakout_volume",
                GateVerdict::Reject,
                &fields.with("min", cfg.breakout_volume_zscore),
            );
            return None;
        }

        let confirm = cfg.confirm_bars.min(n - 1);
        let consecutive = (n - confirm..n).all(|i| (bars[i].close - bars[i - 1].close) * sign > 0.0);
        let reference = bars[(n - 1).saturating_sub(cfg.momentum_bars)].close;
        let momentum = (current.close - reference) * sign;
        if !consecutive || momentum < cfg.momentum_atr * atr {
            diagnostics.record(
                "breakout_confirmation",
                GateVerdict::Reject,
                &fields.with("momentum_atr", momentum / atr),
            );
            return None;
        }

        Some(StructureBreak { direction, level, retest: false, volume_zscore })
    }

    /// Rejects entries at the swing extreme in the trade direction and bars
    /// still extending against it (new low closing in its lower half, for a
    /// long)
    fn check_swing_extreme(
        &self,
        bars: &[Bar],
        swings: &SwingState,
        direction: Direction,
        atr: f64,
        diagnostics: &dyn Diagnostics,
    ) -> Result<(), Rejection> {
        let cfg = &self.config;
        let n = bars.len();
        let current = &bars[n - 1];
        let close = current.close;

        let extreme = match direction {
            Direction::Long => swings.last_high.as_ref(),
            Direction::Short => swings.last_low.as_ref(),
        };
        if let Some(swing) = extreme {
            let distance_atr = (swing.price - close) * direction.sign() / atr;
            if distance_atr <= cfg.extreme_tolerance_atr {
                return Err(Rejection::SwingExtreme {
                    direction,
                    price: close,
                    extreme: swing.price,
                    distance_atr,
                    tolerance_atr: cfg.extreme_tolerance_atr,
                });
            }
        }

        let prior = &bars[(n - 1).saturating_sub(cfg.extreme_lookback)..n - 1];
        let close_location = current.close_location();
        let fields = Measurements::new()
            .with("direction", direction.sign())
            .with("price", close)
            .with("close_location", close_location);
        if prior.is_empty() {
            passed(diagnostics, "swing_extreme", fields);
            return Ok(());
        }
        let extending = match direction {
            Direction::Long => {
                let low = indicators::lowest_low(prior);
                (current.low <= low && close_location < 0.5).then_some((current.low, low))
            }
            Direction::Short => {
                let high = indicators::highest_high(prior);
                (current.high >= high && close_location > 0.5).then_some((current.high, high))
            }
        };
        match extending {
            Some((bar_extreme, prior_extreme)) => Err(Rejection::ExtendingAgainst {
                direction,
                bar_extreme,
                prior_extreme,
                close_location,
            }),
            None => {
                passed(diagnostics, "swing_extreme", fields);
                Ok(())
            }
        }
    }

    fn check_risk_reward(&self, risk_reward: f64, diagnostics: &dyn Diagnostics) -> Result<(), Rejection> {
        let min = self.config.min_risk_reward;
        if risk_reward < min {
            return Err(Rejection::RiskReward { risk_reward, min });
        }
        passed(diagnostics, "risk_reward", Measurements::new().with("risk_reward", risk_reward).with("min", min));
        Ok(())
    }

    fn check_quality(&self, quality: f64, diagnostics: &dyn Diagnostics) -> Result<(), Rejection> {
        let floor = self.config.min_quality;
        if quality < floor {
            return Err(Rejection::QualityFloor { quality, floor });
        }
        passed(diagnostics, "quality", Measurements::new().with("quality", quality).with("floor", floor));
        Ok(())
    }

    fn check_confidence(&self, confidence: f64, diagnostics: &dyn Diagnostics) -> Result<(), Rejection> {
        let floor = self.config.min_confidence;
        if confidence < floor {
            return Err(Rejection::ConfidenceFloor { confidence, floor });
        }
        passed(
            diagnostics,
            "confidence",
            Measurements::new().with("confidence", confidence).with("floor", floor),
        );
        Ok(())
    }

    /// Gate 9: volatility tier, regime and instrument multipliers, clamp,
    /// then snap to the natural swing stop when it is close enough
    fn stop_distance(
        &self,
        regime: &RegimeState,
        swings: &SwingState,
        micro: Option<&MicrostructureSummary>,
        direction: Direction,
        entry: f64,
        atr: f64,
    ) -> f64 {
        let cfg = &self.config;
        let atr_pct = atr / entry * 100.0;
        let mut mult = if atr_pct < cfg.low_vol_atr_pct {
            cfg.stop_atr_low_vol
        } else if atr_pct < cfg.mid_vol_atr_pct {
            cfg.stop_atr_mid_vol
        } else {
            cfg.stop_atr_high_vol
        };
        mult *= if regime.is_trending() { cfg.trend_stop_mult } else { cfg.range_stop_mult };
        mult *= self.profile.stop_multiplier;
        if swings.quality >= 70.0 {
            mult *= 0.9;
        } else if swings.quality < 50.0 {
            mult *= 1.1;
        }
        if let Some(m) = micro {
            if m.atr_elevated {
                mult *= 1.2;
            }
            if m.absorption {
                mult *= 0.9;
            }
        }
        let mut distance = mult.clamp(cfg.min_stop_atr, cfg.max_stop_atr) * atr;

        let buffer = cfg.pullback_stop_buffer_atr * atr;
        let natural = match direction {
            Direction::Long => swings
                .last_low
                .as_ref()
                .filter(|s| s.price < entry)
                .map(|s| entry - (s.price - buffer)),
            Direction::Short => swings
                .last_high
                .as_ref()
                .filter(|s| s.price > entry)
                .map(|s| (s.price + buffer) - entry),
        };
        if let Some(d) = natural {
            if d >= cfg.natural_stop_min * distance && d <= cfg.natural_stop_max * distance {
                distance = d;
            }
        }
        distance
    }
}

fn passed(diagnostics: &dyn Diagnostics, gate: &str, fields: Measurements) {
    diagnostics.record(gate, GateVerdict::Pass, &fields);
}

/// +5 each: volume, VWAP proximity, opening-range breakout in the trade
/// direction, peak session hours, deep liquidity
fn microstructure_bonus(micro: Option<&MicrostructureSummary>, direction: Direction) -> f64 {
    let Some(m) = micro else {
        return 0.0;
    };
    let mut bonus = 0.0;
    if m.volume_zscore >= 1.0 {
        bonus += 5.0;
    }
    if m.vwap > 0.0 && m.vwap_distance_pct.abs() <= 0.5 {
        bonus += 5.0;
    }
    if m.opening_range.breakout == Some(direction) {
        bonus += 5.0;
    }
    if m.high_quality_time {
        bonus += 5.0;
    }
    if m.liquidity_score >= 0.7 {
        bonus += 5.0;
    }
    bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::diagnostics::RecordingDiagnostics;
    use crate::trading_core::pullback::PullbackConfig;
    use crate::trading_core::regime::RegimeClassifier;
    use crate::trading_core::swings::SwingDetector;
    use crate::trading_core::candles::PatternKind;
    use crate::trading_core::testing::{bar, bars_from_closes, scenario};
    use crate::types::TrendDirection;

    fn detector() -> SignalDetector {
        SignalDetector::new(
            InstrumentProfile::eurusd(),
            DetectorConfig::default(),
            PullbackDetector::new(PullbackConfig::default(), CandleConfig::default()),
            CandleConfig::default(),
        )
    }

    fn run(det: &mut SignalDetector, bars: &[Bar], diag: &RecordingDiagnostics) -> Detection {
        let regime = RegimeClassifier::default().detect(bars);
        let swings = SwingDetector::default().detect(bars, None);
        det.detect(bars, &regime, &swings, &PivotLevels::empty(), None, diag).unwrap()
    }

    #[test]
    fn test_insufficient_bars() {
        let bars = bars_from_closes(&[100.0; 10], 0.5);
        let diag = RecordingDiagnostics::new();
        let detection = run(&mut detector(), &bars, &diag);
        assert!(detection.signals.is_empty());
        assert_eq!(
            detection.rejection,
            Some(Rejection::InsufficientBars { bars: 10, required: 20 })
        );
        assert_eq!(diag.rejections()[0].gate, "min_bars");
    }

    #[test]
    fn test_uptrend_pullback_emits_buy() {
        let bars = scenario::uptrend_pullback(true);
        let diag = RecordingDiagnostics::new();
        let detection = run(&mut detector(), &bars, &diag);

        assert_eq!(detection.signals.len(), 1, "rejected: {:?}", detection.rejection);
        let signal = &detection.signals[0];
        let pullback_low = indicators::lowest_low(&bars[bars.len() - 10..]);
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.source, SignalSource::Pullback);
        assert!(signal.quality >= 60.0);
        assert!(signal.confidence >= 60.0);
        assert!(signal.stop < pullback_low);
        assert!(signal.entry < bars[bars.len() - 1].close);
        assert!(signal.target > signal.entry);
        assert!(signal.risk_reward >= 1.5);
        assert!(diag.rejections().is_empty());

        let gates: Vec<String> = diag.records().into_iter().map(|r| r.gate).collect();
        assert_eq!(
            gates,
            [
                "min_bars",
                "cooldown",
                "trend_alignment",
                "swing_quality",
                "swing_extreme",
                "risk_reward",
                "quality",
                "confidence",
                "emit"
            ]
        );
    }

    #[test]
    fn test_extending_bar_rejected_at_swing_extreme() {
        let bars = scenario::uptrend_pullback(false);
        let diag = RecordingDiagnostics::new();
        let detection = run(&mut detector(), &bars, &diag);

        assert!(detection.signals.is_empty());
        let rejection = detection.rejection.unwrap();
        assert_eq!(rejection.gate(), "swing_extreme");
        assert!(matches!(rejection, Rejection::ExtendingAgainst { direction: Direction::Long, .. }));
    }

    #[test]
    fn test_cooldown_after_signal() {
        let bars = scenario::uptrend_pullback(true);
        let diag = RecordingDiagnostics::new();
        let mut det = detector();
        assert_eq!(run(&mut det, &bars, &diag).signals.len(), 1);
        assert_eq!(det.last_signal_time(), Some(bars[bars.len() - 1].timestamp));

        let again = run(&mut det, &bars, &diag);
        assert!(again.signals.is_empty());
        assert_eq!(again.rejection, Some(Rejection::Cooldown { bars_since: 0, required: 3 }));
    }

    #[test]
    fn test_identical_inputs_identical_output() {
        let bars = scenario::uptrend_pullback(true);
        let diag = RecordingDiagnostics::new();
        let det = detector();
        let first = run(&mut det.clone(), &bars, &diag);
        let second = run(&mut det.clone(), &bars, &diag);
        assert_eq!(first, second);
    }

    #[test]
    fn test_fast_trend_disagreement_rejected() {
        let bars = scenario::uptrend_pullback(true);
        let mut regime = RegimeClassifier::default().detect(&bars);
        if let Some(tag) = regime.fast_trend.as_mut() {
            tag.direction = TrendDirection::Down;
        }
        let swings = SwingDetector::default().detect(&bars, None);
        let diag = RecordingDiagnostics::new();
        let detection = detector()
            .detect(&bars, &regime, &swings, &PivotLevels::empty(), None, &diag)
            .unwrap();
        assert_eq!(
            detection.rejection,
            Some(Rejection::TrendMisaligned {
                regime: TrendDirection::Up,
                fast_trend: Some(TrendDirection::Down)
            })
        );
    }

    #[test]
    fn test_ranging_breakout_without_volume_suppressed() {
        let (bars, level) = scenario::ranging_breakout();
        let regime = RegimeClassifier::default().detect(&bars);
        assert!(!regime.is_trending());
        let swings = SwingDetector::default().detect(&bars, None);
        let micro = MicrostructureSummary {
            volume_zscore: 0.5,
            ..MicrostructureSummary::neutral()
        };
        let diag = RecordingDiagnostics::new();
        let strict = detector()
            .detect(&bars, &regime, &swings, &PivotLevels::empty(), Some(&micro), &diag)
            .unwrap();
        assert!(strict.signals.is_empty());
        assert_eq!(strict.rejection.map(|r| r.gate()), Some("trend_alignment"));

        let mut relaxed = SignalDetector::new(
            InstrumentProfile::eurusd(),
            DetectorConfig { strict_alignment: false, ..DetectorConfig::default() },
            PullbackDetector::new(PullbackConfig::default(), CandleConfig::default()),
            CandleConfig::default(),
        );
        let detection = relaxed
            .detect(&bars, &regime, &swings, &PivotLevels::empty(), Some(&micro), &diag)
            .unwrap();

        assert!(detection.signals.is_empty());
        let volume = diag
            .rejections()
            .into_iter()
            .find(|r| r.gate == "breakout_volume")
            .expect("breakout volume rejection");
        assert_eq!(volume.fields.get("level"), Some(level));
        assert_eq!(volume.fields.get("volume_zscore"), Some(0.5));
    }

    #[test]
    fn test_natural_swing_stop_within_band() {
        let bars = scenario::uptrend_pullback(true);
        let regime = RegimeClassifier::default().detect(&bars);
        let swings = SwingDetector::default().detect(&bars, None);
        assert!(regime.is_trending() && swings.quality >= 70.0);
        let det = detector();
        let atr = indicators::atr(&bars, 14);
        let low = swings.last_low.as_ref().unwrap().price;

        // Swing low 1.3 ATR below entry (with buffer): inside the band, used as is
        let entry = low + 1.2 * atr;
        let distance = det.stop_distance(&regime, &swings, None, Direction::Long, entry, atr);
        assert!((distance - 1.3 * atr).abs() < 1e-9);

        // Far swing low: computed stop, mid-volatility tier x trend x quality
        let entry = low + 5.0 * atr;
        let distance = det.stop_distance(&regime, &swings, None, Direction::Long, entry, atr);
        assert!((distance - 1.5 * 1.15 * 0.9 * atr).abs() < 1e-9);
    }

    fn range_detector() -> SignalDetector {
        SignalDetector::new(
            InstrumentProfile::eurusd(),
            DetectorConfig { strict_alignment: false, ..DetectorConfig::default() },
            PullbackDetector::new(PullbackConfig::default(), CandleConfig::default()),
            CandleConfig::default(),
        )
    }

    #[test]
    fn test_mid_range_engulfing_emits_pattern_signal() {
        // Range 100.0-100.4; the last range bar closes at 100.04 (bearish body 0.02)
        let (mut bars, _) = scenario::ranging_breakout();
        bars.pop();
        bars.push(bar(80, 100.035, 100.10, 100.03, 100.095));

        let diag = RecordingDiagnostics::new();
        let detection = range_detector()
            .detect(
                &bars,
                &RegimeState::insufficient(),
                &SwingState::empty(50.0),
                &PivotLevels::empty(),
                None,
                &diag,
            )
            .unwrap();

        assert_eq!(detection.signals.len(), 1, "rejected: {:?}", detection.rejection);
        let signal = &detection.signals[0];
        assert_eq!(signal.source, SignalSource::Pattern);
        assert_eq!(signal.direction, Direction::Long);
        assert_eq!(signal.patterns, vec![PatternKind::BullishEngulfing]);
        assert!((signal.entry - 100.095).abs() < 1e-12);
        // One agreeing pattern: 2.0 x 0.85, no pivot to clamp the target
        assert!((signal.risk_reward - 1.7).abs() < 1e-9);
        // Quiet tier 1.8 x range 0.9
        assert!((signal.entry - signal.stop - 1.62 * signal.atr).abs() < 1e-9);
        assert_eq!(signal.quality, 60.0);
        // Base 60 plus the full-strength engulfing
        assert!((signal.confidence - 70.0).abs() < 1e-9);

        let gates: Vec<String> = diag.records().into_iter().map(|r| r.gate).collect();
        assert_eq!(
            gates,
            [
                "min_bars",
                "cooldown",
                "trend_alignment",
                "swing_quality",
                "patterns",
                "direction",
                "trend_filter",
                "risk_reward",
                "quality",
                "confidence",
                "emit"
            ]
        );
    }

    #[test]
    fn test_buy_at_range_top_rejected() {
        let (bars, level) = scenario::ranging_breakout();
        let diag = RecordingDiagnostics::new();
        let detection = range_detector()
            .detect(
                &bars,
                &RegimeState::insufficient(),
                &SwingState::empty(50.0),
                &PivotLevels::empty(),
                None,
                &diag,
            )
            .unwrap();

        assert!(detection.signals.is_empty());
        // Measured against the prior bars' high, not the breakout bar's own
        assert_eq!(
            detection.rejection,
            Some(Rejection::RangeExtreme {
                direction: Direction::Long,
                price: bars[bars.len() - 1].close,
                extreme: level,
            })
        );
        assert_eq!(diag.rejections()[0].gate, "trend_filter");
    }
}
