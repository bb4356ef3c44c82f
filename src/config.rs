//! Pipeline configuration and per-instrument profiles

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::trading_core::bars::DEFAULT_WINDOW_CAPACITY;
use crate::trading_core::candles::CandleConfig;
use crate::trading_core::edge::DetectorConfig;
use crate::trading_core::lifecycle::LifecycleConfig;
use crate::trading_core::microstructure::MicrostructureConfig;
use crate::trading_core::pivots::PivotConfig;
use crate::trading_core::pullback::PullbackConfig;
use crate::trading_core::regime::RegimeConfig;
use crate::trading_core::swings::SwingConfig;
use crate::types::Timeframe;

/// Session and volatility characteristics of one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentProfile {
    pub symbol: String,

    /// Exchange / session timezone
    pub timezone: Tz,

    /// Session start (local)
    pub session_start_hour: u32,
    pub session_start_minute: u32,

    /// Session end (local); an end before the start wraps past midnight
    pub session_end_hour: u32,
    pub session_end_minute: u32,

    /// Opening range length in minutes
    pub opening_range_minutes: u32,

    /// Local hour ranges [start, end) with peak liquidity
    pub peak_hours: Vec<(u32, u32)>,

    /// Multiplier on the computed stop distance
    pub stop_multiplier: f64,
}

impl Default for InstrumentProfile {
    fn default() -> Self {
        Self::eurusd()
    }
}

impl InstrumentProfile {
    /// EUR/USD: London session, London/New York overlap is peak
    pub fn eurusd() -> Self {
        Self {
            symbol: "EURUSD".to_string(),
            timezone: chrono_tz::Europe::London,
            session_start_hour: 8,
            session_start_minute: 0,
            session_end_hour: 17,
            session_end_minute: 0,
            opening_range_minutes: 30,
            peak_hours: vec![(8, 11), (13, 16)],
            stop_multiplier: 1.0,
        }
    }

    /// Nasdaq 100 cash index: New York regular hours
    pub fn nas100() -> Self {
        Self {
            symbol: "NAS100".to_string(),
            timezone: chrono_tz::America::New_York,
            session_start_hour: 9,
            session_start_minute: 30,
            session_end_hour: 16,
            session_end_minute: 0,
            opening_range_minutes: 30,
            peak_hours: vec![(9, 11), (15, 16)],
            stop_multiplier: 1.2,
        }
    }

    /// Spot gold: London open through the New York morning
    pub fn xauusd() -> Self {
        Self {
            symbol: "XAUUSD".to_string(),
            timezone: chrono_tz::Europe::London,
            session_start_hour: 8,
            session_start_minute: 0,
            session_end_hour: 17,
            session_end_minute: 0,
            opening_range_minutes: 30,
            peak_hours: vec![(8, 10), (13, 16)],
            stop_multiplier: 1.3,
        }
    }

    /// Preset by symbol, falling back to the EUR/USD session with `symbol` set
    pub fn for_symbol(symbol: &str) -> Self {
        match symbol.to_ascii_uppercase().as_str() {
            "NAS100" | "US100" | "NDX" => Self::nas100(),
            "XAUUSD" | "GOLD" => Self::xauusd(),
            "EURUSD" => Self::eurusd(),
            other => Self {
                symbol: other.to_string(),
                ..Self::eurusd()
            },
        }
    }

    pub fn local(&self, ts: DateTime<Utc>) -> DateTime<Tz> {
        self.timezone.from_utc_datetime(&ts.naive_utc())
    }

    pub fn session_start_minutes(&self) -> u32 {
        self.session_start_hour * 60 + self.session_start_minute
    }

    pub fn session_end_minutes(&self) -> u32 {
        self.session_end_hour * 60 + self.session_end_minute
    }

    /// Is `ts` inside the trading session (local time)
    pub fn in_session(&self, ts: DateTime<Utc>) -> bool {
        let local = self.local(ts);
        let current = local.hour() * 60 + local.minute();
        let start = self.session_start_minutes();
        let end = self.session_end_minutes();
        if start <= end {
            current >= start && current < end
        } else {
            current >= start || current < end
        }
    }

    pub fn is_peak(&self, ts: DateTime<Utc>) -> bool {
        let hour = self.local(ts).hour();
        self.peak_hours.iter().any(|&(start, end)| hour >= start && hour < end)
    }
}

/// Full pipeline configuration, one component section each
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub timeframe: Timeframe,
    /// Bars kept per instrument
    pub window_capacity: usize,
    pub pivots: PivotConfig,
    pub swings: SwingConfig,
    pub microstructure: MicrostructureConfig,
    pub regime: RegimeConfig,
    pub pullback: PullbackConfig,
    pub candles: CandleConfig,
    pub detector: DetectorConfig,
    pub lifecycle: LifecycleConfig,
    pub instruments: Vec<InstrumentProfile>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::M15,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            pivots: PivotConfig::default(),
            swings: SwingConfig::default(),
            microstructure: MicrostructureConfig::default(),
            regime: RegimeConfig::default(),
            pullback: PullbackConfig::default(),
            candles: CandleConfig::default(),
            detector: DetectorConfig::default(),
            lifecycle: LifecycleConfig::default(),
            instruments: vec![
                InstrumentProfile::eurusd(),
                InstrumentProfile::nas100(),
                InstrumentProfile::xauusd(),
            ],
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Configured profile for `symbol`, else the built-in preset
    pub fn profile(&self, symbol: &str) -> InstrumentProfile {
        self.instruments
            .iter()
            .find(|p| p.symbol.eq_ignore_ascii_case(symbol))
            .cloned()
            .unwrap_or_else(|| InstrumentProfile::for_symbol(symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_hours_in_local_time() {
        let nas = InstrumentProfile::nas100();
        // 2025-03-03 is before the US DST switch: New York = UTC-5
        let open = Utc.with_ymd_and_hms(2025, 3, 3, 14, 30, 0).unwrap();
        let pre = Utc.with_ymd_and_hms(2025, 3, 3, 14, 15, 0).unwrap();
        assert!(nas.in_session(open));
        assert!(!nas.in_session(pre));
        assert!(nas.is_peak(open));
        assert!(!nas.is_peak(Utc.with_ymd_and_hms(2025, 3, 3, 17, 0, 0).unwrap()));
    }

    #[test]
    fn test_overnight_session_wraps() {
        let profile = InstrumentProfile {
            session_start_hour: 22,
            session_end_hour: 6,
            timezone: chrono_tz::UTC,
            ..InstrumentProfile::eurusd()
        };
        assert!(profile.in_session(Utc.with_ymd_and_hms(2025, 3, 3, 23, 0, 0).unwrap()));
        assert!(profile.in_session(Utc.with_ymd_and_hms(2025, 3, 4, 2, 0, 0).unwrap()));
        assert!(!profile.in_session(Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_profile_lookup_and_json_roundtrip() {
        let config = PipelineConfig::default();
        assert_eq!(config.profile("nas100").symbol, "NAS100");
        assert_eq!(config.profile("GBPUSD").symbol, "GBPUSD");

        let json = config.to_json_pretty().unwrap();
        let parsed: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.instruments.len(), 3);
        assert_eq!(parsed.instruments[1].timezone, chrono_tz::America::New_York);

        let partial: PipelineConfig = serde_json::from_str(r#"{"timeframe":"H1"}"#).unwrap();
        assert_eq!(partial.timeframe, Timeframe::H1);
        assert_eq!(partial.detector.cooldown_bars, 3);
    }
}
