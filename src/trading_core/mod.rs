//! Trading Core - market structure analysis and signal generation
//!
//! Components, leaf to root:
//! - Bars and the bounded bar window
//! - Pivot levels (daily/weekly)
//! - Swing structure and quality
//! - Session microstructure (volume, spread, VWAP, opening range)
//! - Regime classification with fast-trend tagging
//! - Pullback opportunities
//! - Edge detector gate cascade
//! - Signal lifecycle
//! - Per-instrument pipeline orchestration

pub mod bars;
pub mod indicators;
pub mod candles;
pub mod diagnostics;
pub mod pivots;
pub mod swings;
pub mod microstructure;
pub mod regime;
pub mod pullback;
pub mod signal;
pub mod edge;
pub mod lifecycle;
pub mod pipeline;

#[cfg(test)]
pub mod testing;

// Re-export commonly used types
pub use bars::{Bar, BarWindow};
pub use diagnostics::{Diagnostics, GateVerdict, Measurements, NoopDiagnostics, RecordingDiagnostics, TracingDiagnostics};
pub use edge::{DetectorConfig, SignalDetector};
pub use lifecycle::{LifecycleConfig, ManagedSignal, SignalLifecycleManager, SignalStatus, StatusChange};
pub use microstructure::{MicrostructureAnalyzer, MicrostructureSummary};
pub use pipeline::{CycleReport, InstrumentPipeline, PipelineSet};
pub use pivots::{PivotCalculator, PivotLevels};
pub use pullback::{PullbackDetector, PullbackOpportunity};
pub use regime::{RegimeClassifier, RegimeLabel, RegimeState};
pub use signal::{Detection, Rejection, TradingSignal};
pub use swings::{SwingDetector, SwingState};
