//! Per-instrument pipeline
//!
//! One `InstrumentPipeline` per symbol, driven bar by bar:
//! 1. Push the bar into the bounded window (duplicates replace, older bars are rejected)
//! 2. Pivots from the prior completed day/week
//! 3. Swings (pivot-aware quality)
//! 4. Microstructure summary and regime
//! 5. Signal detector cascade
//! 6. Lifecycle tick at the bar close, then hand any new signal to the lifecycle
//!
//! At most one signal is active per instrument: a new signal replaces a
//! PENDING one and is dropped while a TRIGGERED one is working.
//! `PipelineSet` routes bars by symbol and runs instruments in parallel.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::bars::{Bar, BarWindow};
use super::diagnostics::{Diagnostics, TracingDiagnostics};
use super::edge::SignalDetector;
use super::lifecycle::{LifecycleStats, SignalLifecycleManager, SignalStatus, StatusChange};
use super::microstructure::MicrostructureAnalyzer;
use super::pivots::PivotCalculator;
use super::pullback::PullbackDetector;
use super::regime::RegimeClassifier;
use super::signal::{Detection, RegimeSnapshot};
use super::swings::SwingDetector;
use crate::config::{InstrumentProfile, PipelineConfig};
use crate::error::{CoreError, CoreResult};
use crate::types::Timeframe;

/// Outcome of one bar
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub regime: RegimeSnapshot,
    pub detection: Detection,
    /// Lifecycle id of the signal created on this bar
    pub created: Option<Uuid>,
    pub changes: Vec<StatusChange>,
}

pub struct InstrumentPipeline {
    profile: InstrumentProfile,
    timeframe: Timeframe,
    window: BarWindow,
    pivots: PivotCalculator,
    swings: SwingDetector,
    microstructure: MicrostructureAnalyzer,
    regime: RegimeClassifier,
    detector: SignalDetector,
    lifecycle: SignalLifecycleManager,
    diagnostics: Arc<dyn Diagnostics>,
}

impl InstrumentPipeline {
    pub fn new(profile: InstrumentProfile, config: &PipelineConfig) -> Self {
        let diagnostics: Arc<dyn Diagnostics> = Arc::new(TracingDiagnostics::new(&profile.symbol));
        let detector = SignalDetector::new(
            profile.clone(),
            config.detector.clone(),
            PullbackDetector::new(config.pullback.clone(), config.candles.clone()),
            config.candles.clone(),
        );
        Self {
            timeframe: config.timeframe,
            window: BarWindow::new(config.window_capacity),
            pivots: PivotCalculator::new(config.pivots.clone()),
            swings: SwingDetector::new(config.swings.clone()),
            microstructure: MicrostructureAnalyzer::new(config.microstructure.clone(), config.timeframe),
            regime: RegimeClassifier::new(config.regime.clone()),
            detector,
            lifecycle: SignalLifecycleManager::new(config.lifecycle.clone()),
            diagnostics,
            profile,
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn symbol(&self) -> &str {
        &self.profile.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        self.window.as_slice()
    }

    pub fn lifecycle(&self) -> &SignalLifecycleManager {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut SignalLifecycleManager {
        &mut self.lifecycle
    }

    /// Run one full cycle on a newly completed bar
    pub fn on_bar(&mut self, bar: Bar) -> CoreResult<CycleReport> {
        let timestamp = bar.timestamp;
        let close = bar.close;
        self.window.push(bar)?;
        let bars = self.window.as_slice();

        let pivots = self.pivots.calculate(bars, self.timeframe)?;
        let swings = self.swings.detect(bars, Some(&pivots));
        let micro = self.microstructure.summarize(&self.profile, bars);
        let regime = self.regime.detect(bars);
        debug!(
            "{} {} regime={} adx={:.1} swings={} q={:.0}",
            self.profile.symbol, timestamp, regime.label, regime.adx, swings.swings.len(), swings.quality
        );

        let detection = self.detector.detect(
            bars,
            &regime,
            &swings,
            &pivots,
            Some(&micro),
            self.diagnostics.as_ref(),
        )?;

        let mut changes = self.lifecycle.update(close, micro.atr, timestamp);
        let mut created = None;
        if let Some(signal) = detection.signal() {
            let working = self
                .lifecycle
                .active()
                .iter()
                .any(|m| m.status == SignalStatus::Triggered);
            if working {
                info!("{} new {} signal dropped: a triggered signal is working", self.profile.symbol, signal.direction);
            } else {
                let stale: Vec<Uuid> = self
                    .lifecycle
                    .active()
                    .iter()
                    .filter(|m| m.status == SignalStatus::Pending)
                    .map(|m| m.id)
                    .collect();
                for id in stale {
                    if let Ok(change) = self.lifecycle.cancel(id, timestamp) {
                        changes.push(change);
                    }
                }
                created = Some(self.lifecycle.create(signal.clone(), close, timestamp).id);
            }
        }

        Ok(CycleReport {
            symbol: self.profile.symbol.clone(),
            timestamp,
            regime: RegimeSnapshot::from(&regime),
            detection,
            created,
            changes,
        })
    }
}

/// Reports and errors of one symbol in a batch
#[derive(Debug, Default)]
pub struct SymbolRun {
    pub reports: Vec<CycleReport>,
    pub errors: Vec<(DateTime<Utc>, CoreError)>,
}

/// Pipelines keyed by symbol
pub struct PipelineSet {
    config: PipelineConfig,
    pipelines: BTreeMap<String, InstrumentPipeline>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
}

impl PipelineSet {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            pipelines: BTreeMap::new(),
            diagnostics: None,
        }
    }

    /// Shared sink for every pipeline created afterwards
    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn get(&self, symbol: &str) -> Option<&InstrumentPipeline> {
        self.pipelines.get(symbol)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn stats(&self) -> BTreeMap<String, LifecycleStats> {
        self.pipelines
            .iter()
            .map(|(symbol, p)| (symbol.clone(), p.lifecycle.stats()))
            .collect()
    }

    fn ensure(&mut self, symbol: &str) {
        if self.pipelines.contains_key(symbol) {
            return;
        }
        let mut pipeline = InstrumentPipeline::new(self.config.profile(symbol), &self.config);
        if let Some(ref diagnostics) = self.diagnostics {
            pipeline = pipeline.with_diagnostics(Arc::clone(diagnostics));
        }
        self.pipelines.insert(symbol.to_string(), pipeline);
    }

    /// Feed `(symbol, bar)` pairs. Bars keep their relative order within a
    /// symbol; symbols run in parallel. A failed bar is recorded and skipped.
    pub fn process_batch(&mut self, batch: Vec<(String, Bar)>) -> BTreeMap<String, SymbolRun> {
        let mut grouped: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
        for (symbol, bar) in batch {
            grouped.entry(symbol).or_default().push(bar);
        }
        for symbol in grouped.keys() {
            self.ensure(symbol);
        }

        self.pipelines
            .par_iter_mut()
            .filter_map(|(symbol, pipeline)| {
                let bars = grouped.get(symbol)?;
                let mut run = SymbolRun::default();
                for bar in bars {
                    let timestamp = bar.timestamp;
                    match pipeline.on_bar(bar.clone()) {
                        Ok(report) => run.reports.push(report),
                        Err(e) => {
                            tracing::warn!("{} bar {} skipped: {}", symbol, timestamp, e);
                            run.errors.push((timestamp, e));
                        }
                    }
                }
                Some((symbol.clone(), run))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::diagnostics::RecordingDiagnostics;
    use crate::trading_core::lifecycle::OrderKind;
    use crate::trading_core::testing::{scenario, ts};
    use crate::types::Direction;

    fn pipeline() -> InstrumentPipeline {
        InstrumentPipeline::new(InstrumentProfile::eurusd(), &PipelineConfig::default())
    }

    #[test]
    fn test_uptrend_pullback_end_to_end() {
        let recorder = Arc::new(RecordingDiagnostics::new());
        let mut p = pipeline().with_diagnostics(recorder.clone());
        let bars = scenario::uptrend_pullback(true);
        let pullback_low = bars[bars.len() - 1].low;

        let mut last = None;
        for bar in bars {
            last = Some(p.on_bar(bar).unwrap());
        }
        let report = last.unwrap();

        let signal = report.detection.signal().unwrap();
        assert_eq!(signal.direction, Direction::Long);
        assert!(signal.stop < pullback_low);
        let id = report.created.unwrap();

        let managed = p.lifecycle().get(id).unwrap();
        assert_eq!(managed.status, SignalStatus::Pending);
        assert_eq!(managed.order_kind, OrderKind::Limit);
        assert_eq!(p.lifecycle().active().len(), 1);
        assert!(recorder.records().iter().any(|r| r.gate == "emit"));

        let entry = managed.signal.entry;
        let change = p.lifecycle_mut().mark_executed(id, entry, ts(206)).unwrap();
        assert_eq!(change.to, SignalStatus::Executed);
        assert!(!p.lifecycle().get(id).unwrap().is_active());
        assert!(p.lifecycle().active().is_empty());
    }

    #[test]
    fn test_out_of_order_bar_is_an_error() {
        let mut p = pipeline();
        let bars = scenario::uptrend_pullback(true);
        p.on_bar(bars[5].clone()).unwrap();
        assert!(matches!(p.on_bar(bars[4].clone()), Err(CoreError::OutOfOrder { .. })));
        assert_eq!(p.bars().len(), 1);
    }

    #[test]
    fn test_short_history_reports_without_signal() {
        let mut p = pipeline();
        let bars = scenario::uptrend_pullback(true);
        let report = p.on_bar(bars[0].clone()).unwrap();
        assert_eq!(report.timestamp, ts(0));
        assert!(report.detection.signals.is_empty());
        assert!(report.created.is_none());
    }

    #[test]
    fn test_pipeline_set_routes_by_symbol() {
        let mut set = PipelineSet::new(PipelineConfig::default());
        let (range, _) = scenario::ranging_breakout();
        let trend = scenario::uptrend_pullback(true);

        let mut batch: Vec<(String, Bar)> = Vec::new();
        batch.extend(range.iter().cloned().map(|b| ("NAS100".to_string(), b)));
        batch.extend(trend.iter().cloned().map(|b| ("EURUSD".to_string(), b)));
        batch.push(("EURUSD".to_string(), trend[0].clone()));

        let runs = set.process_batch(batch);
        assert_eq!(runs.len(), 2);

        let eur = &runs["EURUSD"];
        assert_eq!(eur.reports.len(), trend.len());
        assert_eq!(eur.errors.len(), 1);
        assert!(eur.reports[trend.len() - 1].created.is_some());

        let nas = &runs["NAS100"];
        assert_eq!(nas.reports.len(), range.len());
        assert!(nas.errors.is_empty());
        assert_eq!(set.get("NAS100").map(|p| p.symbol()), Some("NAS100"));
        assert_eq!(set.symbols().collect::<Vec<_>>(), vec!["EURUSD", "NAS100"]);
    }
}
