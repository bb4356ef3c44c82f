//! Time-of-day normalized microstructure
//!
//! Volume, spread and ATR are compared against their own history for the same
//! 30-minute local time bucket, so a quiet Asian-session bar is not measured
//! against the New York open. Histories are the only state in the pipeline
//! that persists across cycles; they are pruned to `history_days`.
//!
//! Also computes:
//! - Anchored VWAP from the session (or week) start
//! - Opening range and the first breakout of it (latched once per session)
//! - Liquidity score and the "high quality time" flag

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use super::bars::Bar;
use super::indicators;
use crate::config::InstrumentProfile;
use crate::types::{Direction, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VwapAnchor {
    Session,
    Week,
}

/// Configuration for the microstructure analyzer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MicrostructureConfig {
    /// Time-of-day bucket width in minutes (default: 30)
    pub bucket_minutes: u32,
    /// Days of bucket history kept (default: 20)
    pub history_days: i64,
    /// Samples needed before a bucket statistic is trusted (default: 5)
    pub min_samples: usize,
    pub atr_period: usize,
    /// Liquidity needed for "high quality time" (default: 0.5)
    pub liquidity_floor: f64,
    /// ATR above mean + this many std devs is elevated (default: 1.5)
    pub elevated_sigma: f64,
    /// ATR above this multiple of its bucket mean is elevated (default: 1.5)
    pub elevated_ratio: f64,
    /// Volume z-score for absorption (default: 1.5)
    pub absorption_zscore: f64,
    /// Absorption bar range must be below this many ATRs (default: 0.5)
    pub absorption_range_atr: f64,
    pub vwap_anchor: VwapAnchor,
}

impl Default for MicrostructureConfig {
    fn default() -> Self {
        Self {
            bucket_minutes: 30,
            history_days: 20,
            min_samples: 5,
            atr_period: 14,
            liquidity_floor: 0.5,
            elevated_sigma: 1.5,
            elevated_ratio: 1.5,
            absorption_zscore: 1.5,
            absorption_range_atr: 0.5,
            vwap_anchor: VwapAnchor::Session,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpeningRangeState {
    /// Session has not started for the current bar's local date
    NotStarted,
    /// Fewer bars than required; high/low are the partial range so far
    Building,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpeningRange {
    pub state: OpeningRangeState,
    pub high: f64,
    pub low: f64,
    pub range: f64,
    pub bars_collected: usize,
    pub bars_required: usize,
    pub breakout: Option<Direction>,
    pub breakout_time: Option<DateTime<Utc>>,
}

impl OpeningRange {
    fn not_started(bars_required: usize) -> Self {
        Self {
            state: OpeningRangeState::NotStarted,
            high: 0.0,
            low: 0.0,
            range: 0.0,
            bars_collected: 0,
            bars_required,
            breakout: None,
            breakout_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicrostructureSummary {
    pub volume_zscore: f64,
    pub vwap: f64,
    /// (close - vwap) / vwap, percent
    pub vwap_distance_pct: f64,
    pub opening_range: OpeningRange,
    /// 0..1
    pub liquidity_score: f64,
    pub spread_score: f64,
    pub time_score: f64,
    pub atr: f64,
    /// Current ATR over its bucket mean (1.0 without history)
    pub atr_ratio: f64,
    pub atr_percentile: f64,
    pub atr_elevated: bool,
    pub absorption: bool,
    pub high_quality_time: bool,
}

impl MicrostructureSummary {
    /// Summary with no history and no session information
    pub fn neutral() -> Self {
        Self {
            volume_zscore: 0.0,
            vwap: 0.0,
            vwap_distance_pct: 0.0,
            opening_range: OpeningRange::not_started(0),
            liquidity_score: 0.5,
            spread_score: 0.5,
            time_score: 0.6,
            atr: 0.0,
            atr_ratio: 1.0,
            atr_percentile: 50.0,
            atr_elevated: false,
            absorption: false,
            high_quality_time: false,
        }
    }
}

/// Rolling samples of one time bucket
#[derive(Debug, Default, Clone)]
struct BucketHistory {
    volume: VecDeque<(DateTime<Utc>, f64)>,
    spread: VecDeque<(DateTime<Utc>, f64)>,
    atr: VecDeque<(DateTime<Utc>, f64)>,
}

impl BucketHistory {
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        for series in [&mut self.volume, &mut self.spread, &mut self.atr] {
            while series.front().is_some_and(|(ts, _)| *ts < cutoff) {
                series.pop_front();
            }
        }
    }

    /// Forget samples at or after `from`
    fn drop_from(&mut self, from: DateTime<Utc>) {
        for series in [&mut self.volume, &mut self.spread, &mut self.atr] {
            while series.back().is_some_and(|(ts, _)| *ts >= from) {
                series.pop_back();
            }
        }
    }
}

/// Samples strictly before `now`, so repeated calls on the same window agree
fn prior(series: &VecDeque<(DateTime<Utc>, f64)>, now: DateTime<Utc>) -> Vec<f64> {
    series.iter().filter(|(ts, _)| *ts < now).map(|(_, v)| *v).collect()
}

#[derive(Debug, Default)]
struct SymbolProfile {
    buckets: HashMap<u32, BucketHistory>,
    last_recorded: Option<DateTime<Utc>>,
    /// Session date and the breakout latched for it
    orb_latch: Option<(NaiveDate, Direction, DateTime<Utc>)>,
}

/// Per-symbol microstructure state; one writer per symbol
pub struct MicrostructureAnalyzer {
    config: MicrostructureConfig,
    timeframe: Timeframe,
    profiles: HashMap<String, SymbolProfile>,
}

impl MicrostructureAnalyzer {
    pub fn new(config: MicrostructureConfig, timeframe: Timeframe) -> Self {
        Self {
            config,
            timeframe,
            profiles: HashMap::new(),
        }
    }

    pub fn config(&self) -> &MicrostructureConfig {
        &self.config
    }

    /// Number of samples held for `symbol` across all buckets
    pub fn sample_count(&self, symbol: &str) -> usize {
        self.profiles
            .get(symbol)
            .map(|p| p.buckets.values().map(|b| b.volume.len()).sum())
            .unwrap_or(0)
    }

    fn bucket_of(&self, profile: &InstrumentProfile, ts: DateTime<Utc>) -> u32 {
        let local = profile.local(ts);
        (local.hour() * 60 + local.minute()) / self.config.bucket_minutes.max(1)
    }

    /// Record every bar not seen before, then summarize the newest bar.
    pub fn summarize(&mut self, profile: &InstrumentProfile, bars: &[Bar]) -> MicrostructureSummary {
        let Some(current) = bars.last() else {
            return MicrostructureSummary::neutral();
        };
        self.record(profile, bars);

        let now = current.timestamp;
        let atr_period = self.config.atr_period;
        let atr = indicators::atr(&bars[bars.len().saturating_sub(atr_period * 3)..], atr_period);
        let bucket_key = self.bucket_of(profile, now);

        let (volume_hist, spread_hist, atr_hist) = match self
            .profiles
            .get(&profile.symbol)
            .and_then(|p| p.buckets.get(&bucket_key))
        {
            Some(bucket) => (prior(&bucket.volume, now), prior(&bucket.spread, now), prior(&bucket.atr, now)),
            None => (Vec::new(), Vec::new(), Vec::new()),
        };

        let volume_zscore = self.zscore(&volume_hist, current.volume);
        let spread_score = self.spread_score(&spread_hist, current.spread);
        let time_score = if profile.is_peak(now) {
            1.0
        } else if profile.in_session(now) {
            0.6
        } else {
            0.2
        };
        let volume_score = ((volume_zscore + 2.0) / 4.0).clamp(0.0, 1.0);
        let liquidity_score = (0.4 * volume_score + 0.3 * spread_score + 0.3 * time_score).clamp(0.0, 1.0);

        let (atr_ratio, atr_percentile, atr_elevated) = self.atr_state(&atr_hist, atr);

        let (vwap, vwap_distance_pct) = self.anchored_vwap(profile, bars);
        let opening_range = self.opening_range(profile, bars);

        let absorption = volume_zscore >= self.config.absorption_zscore
            && atr > 0.0
            && current.range() < self.config.absorption_range_atr * atr;
        let high_quality_time = liquidity_score >= self.config.liquidity_floor && !atr_elevated;

        let summary = MicrostructureSummary {
            volume_zscore,
            vwap,
            vwap_distance_pct,
            opening_range,
            liquidity_score,
            spread_score,
            time_score,
            atr,
            atr_ratio,
            atr_percentile,
            atr_elevated,
            absorption,
            high_quality_time,
        };

        tracing::debug!(
            "{} micro: vol_z={:.2} liq={:.2} atr_ratio={:.2} vwap_dist={:.3}% or={:?}",
            profile.symbol, volume_zscore, liquidity_score, atr_ratio, vwap_distance_pct,
            summary.opening_range.state
        );

        summary
    }

    /// Add samples for bars newer than the last recorded one and prune.
    /// The last recorded bar is sampled again since the window may have
    /// replaced it with a bar of the same timestamp.
    fn record(&mut self, profile: &InstrumentProfile, bars: &[Bar]) {
        let Some(newest) = bars.last().map(|b| b.timestamp) else {
            return;
        };
        let last_recorded = self.profiles.get(&profile.symbol).and_then(|p| p.last_recorded);
        let start = match last_recorded {
            Some(last) => bars.partition_point(|b| b.timestamp < last),
            None => 0,
        };
        if start >= bars.len() {
            return;
        }
        let from = bars[start].timestamp;

        let period = self.config.atr_period;
        let samples: Vec<(u32, DateTime<Utc>, f64, f64, f64)> = (start..bars.len())
            .map(|i| {
                let bar = &bars[i];
                let atr = indicators::atr(&bars[(i + 1).saturating_sub(period * 3)..=i], period);
                (self.bucket_of(profile, bar.timestamp), bar.timestamp, bar.volume, bar.spread, atr)
            })
            .collect();

        let cutoff = newest - Duration::days(self.config.history_days);
        let entry = self.profiles.entry(profile.symbol.clone()).or_default();
        for bucket in entry.buckets.values_mut() {
            bucket.drop_from(from);
        }
        for (key, ts, volume, spread, atr) in samples {
            let bucket = entry.buckets.entry(key).or_default();
            bucket.volume.push_back((ts, volume));
            bucket.spread.push_back((ts, spread));
            bucket.atr.push_back((ts, atr));
        }
        for bucket in entry.buckets.values_mut() {
            bucket.prune(cutoff);
        }
        entry.buckets.retain(|_, b| !b.volume.is_empty());
        entry.last_recorded = Some(newest);
    }

    fn zscore(&self, history: &[f64], value: f64) -> f64 {
        if history.len() < self.config.min_samples {
            return 0.0;
        }
        let (mean, std) = indicators::mean_std(history);
        if std <= 0.0 {
            return 0.0;
        }
        (value - mean) / std
    }

    /// 1.0 at half the bucket's average spread or tighter, 0 at 1.5x or wider
    fn spread_score(&self, history: &[f64], spread: f64) -> f64 {
        if history.len() < self.config.min_samples {
            return 0.5;
        }
        let avg = indicators::mean(history);
        if avg <= 0.0 {
            return 0.5;
        }
        (1.5 - spread / avg).clamp(0.0, 1.0)
    }

    fn atr_state(&self, history: &[f64], atr: f64) -> (f64, f64, bool) {
        if history.len() < self.config.min_samples {
            return (1.0, 50.0, false);
        }
        let (mean, std) = indicators::mean_std(history);
        if mean <= 0.0 {
            return (1.0, 50.0, false);
        }
        let ratio = atr / mean;
        let percentile = indicators::percentile_rank(history, atr);
        let elevated = atr > mean + self.config.elevated_sigma * std || ratio > self.config.elevated_ratio;
        (ratio, percentile, elevated)
    }

    /// Index of the first bar of the current session (or week)
    fn anchor_index(&self, profile: &InstrumentProfile, bars: &[Bar]) -> usize {
        let Some(last) = bars.last() else {
            return 0;
        };
        let last_local = profile.local(last.timestamp);

        match self.config.vwap_anchor {
            VwapAnchor::Week => {
                let week = last_local.iso_week();
                bars.iter()
                    .position(|b| profile.local(b.timestamp).iso_week() == week)
                    .unwrap_or(0)
            }
            VwapAnchor::Session => {
                let date = last_local.date_naive();
                let start_minutes = profile.session_start_minutes();
                let last_minutes = last_local.hour() * 60 + last_local.minute();
                bars.iter()
                    .position(|b| {
                        let local = profile.local(b.timestamp);
                        let minutes = local.hour() * 60 + local.minute();
                        local.date_naive() == date && (last_minutes < start_minutes || minutes >= start_minutes)
                    })
                    .unwrap_or(0)
            }
        }
    }

    fn anchored_vwap(&self, profile: &InstrumentProfile, bars: &[Bar]) -> (f64, f64) {
        let Some(last) = bars.last() else {
            return (0.0, 0.0);
        };
        let anchored = &bars[self.anchor_index(profile, bars)..];
        let volume: f64 = anchored.iter().map(|b| b.volume).sum();
        let vwap = if volume > 0.0 {
            anchored.iter().map(|b| b.typical_price() * b.volume).sum::<f64>() / volume
        } else {
            indicators::mean(&anchored.iter().map(|b| b.typical_price()).collect::<Vec<_>>())
        };
        let distance = if vwap > 0.0 { (last.close - vwap) / vwap * 100.0 } else { 0.0 };
        (vwap, distance)
    }

    /// Opening range of the current local session and its first breakout
    fn opening_range(&mut self, profile: &InstrumentProfile, bars: &[Bar]) -> OpeningRange {
        let bar_minutes = self.timeframe.minutes().max(1);
        let bars_required = (profile.opening_range_minutes / bar_minutes).max(1) as usize;
        let Some(last) = bars.last() else {
            return OpeningRange::not_started(bars_required);
        };

        let last_local = profile.local(last.timestamp);
        let date = last_local.date_naive();
        let Some(session_start) = date
            .and_hms_opt(profile.session_start_hour, profile.session_start_minute, 0)
            .and_then(|naive| profile.timezone.from_local_datetime(&naive).earliest())
            .map(|local| local.with_timezone(&Utc))
        else {
            return OpeningRange::not_started(bars_required);
        };
        if last.timestamp < session_start {
            return OpeningRange::not_started(bars_required);
        }

        let first = bars.partition_point(|b| b.timestamp < session_start);
        let session = &bars[first..];
        let collected = session.len().min(bars_required);
        let range_bars = &session[..collected];
        let high = indicators::highest_high(range_bars);
        let low = indicators::lowest_low(range_bars);

        let mut or = OpeningRange {
            state: if collected < bars_required {
                OpeningRangeState::Building
            } else {
                OpeningRangeState::Complete
            },
            high,
            low,
            range: high - low,
            bars_collected: collected,
            bars_required,
            breakout: None,
            breakout_time: None,
        };
        if or.state != OpeningRangeState::Complete {
            return or;
        }

        let profile_state = self.profiles.entry(profile.symbol.clone()).or_default();
        if let Some((latched_date, direction, at)) = profile_state.orb_latch {
            if latched_date == date {
                or.breakout = Some(direction);
                or.breakout_time = Some(at);
                return or;
            }
        }

        let breakout = session[collected..].iter().find_map(|b| {
            if b.close > high {
                Some((Direction::Long, b.timestamp))
            } else if b.close < low {
                Some((Direction::Short, b.timestamp))
            } else {
                None
            }
        });
        if let Some((direction, at)) = breakout {
            tracing::info!("{} opening range breakout {} at {}", profile.symbol, direction, at);
            profile_state.orb_latch = Some((date, direction, at));
            or.breakout = Some(direction);
            or.breakout_time = Some(at);
        }
        or
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::testing::{bar, bars_from_closes};

    fn utc_profile() -> InstrumentProfile {
        InstrumentProfile {
            symbol: "TEST".to_string(),
            timezone: chrono_tz::UTC,
            session_start_hour: 8,
            session_start_minute: 0,
            session_end_hour: 17,
            session_end_minute: 0,
            opening_range_minutes: 30,
            peak_hours: vec![(13, 16)],
            stop_multiplier: 1.0,
        }
    }

    /// One bar per day at 10:00 UTC for `days` days, last one with `last_volume`
    fn daily_bars(days: usize, last_volume: f64) -> Vec<Bar> {
        (0..days)
            .map(|d| {
                let mut b = bar(d * 96 + 40, 100.0, 100.5, 99.5, 100.0);
                b.volume = if d == days - 1 { last_volume } else { 900.0 + (d % 3) as f64 * 100.0 };
                b
            })
            .collect()
    }

    #[test]
    fn test_zscore_needs_history() {
        let mut analyzer = MicrostructureAnalyzer::new(MicrostructureConfig::default(), Timeframe::M15);
        let profile = utc_profile();
        let bars = daily_bars(4, 5_000.0);
        let summary = analyzer.summarize(&profile, &bars);
        assert_eq!(summary.volume_zscore, 0.0);
        assert_eq!(summary.atr_ratio, 1.0);
        assert!(!summary.atr_elevated);
    }

    #[test]
    fn test_zscore_against_same_bucket() {
        let mut analyzer = MicrostructureAnalyzer::new(MicrostructureConfig::default(), Timeframe::M15);
        let profile = utc_profile();
        // History volumes 900, 1000, 1100, 900, 1000, 1100: mean 1000, std ~89.4
        let bars = daily_bars(7, 1_200.0);
        let summary = analyzer.summarize(&profile, &bars);
        assert!((summary.volume_zscore - 200.0 / 89.4427).abs() < 1e-3);

        // Same window again: nothing double counted
        let again = analyzer.summarize(&profile, &bars);
        assert_eq!(again.volume_zscore, summary.volume_zscore);
        assert_eq!(analyzer.sample_count("TEST"), 7);
    }

    #[test]
    fn test_replaced_bar_is_sampled_again() {
        let profile = utc_profile();
        let mut first = daily_bars(7, 1_200.0);
        let mut analyzer = MicrostructureAnalyzer::new(MicrostructureConfig::default(), Timeframe::M15);
        analyzer.summarize(&profile, &first);

        first[6].volume = 3_000.0;
        analyzer.summarize(&profile, &first);
        assert_eq!(analyzer.sample_count("TEST"), 7);

        let mut fresh = MicrostructureAnalyzer::new(MicrostructureConfig::default(), Timeframe::M15);
        fresh.summarize(&profile, &first);

        let mut next = bar(7 * 96 + 40, 100.0, 100.5, 99.5, 100.0);
        next.volume = 1_000.0;
        first.push(next);
        let replaced = analyzer.summarize(&profile, &first);
        let expected = fresh.summarize(&profile, &first);
        assert_eq!(replaced.volume_zscore, expected.volume_zscore);
        assert_eq!(replaced.spread_score, expected.spread_score);
    }

    #[test]
    fn test_history_is_pruned_to_lookback() {
        let config = MicrostructureConfig { history_days: 3, ..Default::default() };
        let mut analyzer = MicrostructureAnalyzer::new(config, Timeframe::M15);
        let bars = daily_bars(10, 1_000.0);
        analyzer.summarize(&utc_profile(), &bars);
        assert_eq!(analyzer.sample_count("TEST"), 4);
    }

    #[test]
    fn test_opening_range_progressive_then_breakout_latched() {
        let mut analyzer = MicrostructureAnalyzer::new(MicrostructureConfig::default(), Timeframe::M15);
        let profile = utc_profile();
        // Bars 0..32 are before 08:00, bar 32 is 08:00
        let mut bars: Vec<Bar> = (0..33).map(|i| bar(i, 100.0, 100.2, 99.8, 100.0)).collect();

        let building = analyzer.summarize(&profile, &bars);
        assert_eq!(building.opening_range.state, OpeningRangeState::Building);
        assert_eq!(building.opening_range.bars_collected, 1);
        assert_eq!(building.opening_range.bars_required, 2);

        bars.push(bar(33, 100.0, 100.6, 99.6, 100.3));
        let complete = analyzer.summarize(&profile, &bars);
        assert_eq!(complete.opening_range.state, OpeningRangeState::Complete);
        assert!((complete.opening_range.high - 100.6).abs() < 1e-12);
        assert!(complete.opening_range.breakout.is_none());

        bars.push(bar(34, 100.3, 100.9, 100.2, 100.8));
        let broke = analyzer.summarize(&profile, &bars);
        assert_eq!(broke.opening_range.breakout, Some(Direction::Long));

        // A later close below the range does not flip the latched breakout
        bars.push(bar(35, 100.8, 100.8, 99.0, 99.1));
        let later = analyzer.summarize(&profile, &bars);
        assert_eq!(later.opening_range.breakout, Some(Direction::Long));
        assert_eq!(later.opening_range.breakout_time, Some(bars[34].timestamp));
    }

    #[test]
    fn test_vwap_and_liquidity() {
        let mut analyzer = MicrostructureAnalyzer::new(MicrostructureConfig::default(), Timeframe::M15);
        let profile = utc_profile();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 0.01).collect();
        let bars = bars_from_closes(&closes, 0.1);
        let summary = analyzer.summarize(&profile, &bars);

        // Anchored at 08:00 (bar 32): VWAP below the rising close
        assert!(summary.vwap > 100.3 && summary.vwap < bars[39].close);
        assert!(summary.vwap_distance_pct > 0.0);
        // No history: volume 0.5, spread 0.5, in session 0.6
        assert!((summary.liquidity_score - (0.4 * 0.5 + 0.3 * 0.5 + 0.3 * 0.6)).abs() < 1e-9);
        assert!(summary.high_quality_time);
    }

    #[test]
    fn test_empty_window_is_neutral() {
        let mut analyzer = MicrostructureAnalyzer::new(MicrostructureConfig::default(), Timeframe::M15);
        assert_eq!(analyzer.summarize(&utc_profile(), &[]), MicrostructureSummary::neutral());
    }
}
