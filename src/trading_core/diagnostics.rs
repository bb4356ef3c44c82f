//! Gate diagnostics sink
//!
//! The signal detector records every gate decision here. The core only
//! produces the records; formatting and transport belong to the sink.

use serde::Serialize;
use std::sync::Mutex;

/// Named numeric measurements attached to a gate decision
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Measurements {
    pub values: Vec<(&'static str, f64)>,
}

impl Measurements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: f64) -> Self {
        self.values.push((name, value));
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Display for Measurements {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={:.4}", name, value)?;
        }
        Ok(())
    }
}

/// Outcome of one gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateVerdict {
    Pass,
    Reject,
}

/// Receiver of gate records
pub trait Diagnostics: Send + Sync {
    fn record(&self, gate: &str, verdict: GateVerdict, fields: &Measurements);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {
    fn record(&self, _gate: &str, _verdict: GateVerdict, _fields: &Measurements) {}
}

/// Forwards records to `tracing`: passes at debug, rejections at info
#[derive(Debug, Clone)]
pub struct TracingDiagnostics {
    symbol: String,
}

impl TracingDiagnostics {
    pub fn new(symbol: &str) -> Self {
        Self { symbol: symbol.to_string() }
    }
}

impl Diagnostics for TracingDiagnostics {
    fn record(&self, gate: &str, verdict: GateVerdict, fields: &Measurements) {
        match verdict {
            GateVerdict::Pass => {
                tracing::debug!(symbol = %self.symbol, gate, "pass {}", fields);
            }
            GateVerdict::Reject => {
                tracing::info!(symbol = %self.symbol, gate, "reject {}", fields);
            }
        }
    }
}

/// One stored gate record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateRecord {
    pub gate: String,
    pub verdict: GateVerdict,
    pub fields: Measurements,
}

/// Keeps every record in memory (replay reports and tests)
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    records: Mutex<Vec<GateRecord>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<GateRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn rejections(&self) -> Vec<GateRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.verdict == GateVerdict::Reject)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut records) = self.records.lock() {
            records.clear();
        }
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn record(&self, gate: &str, verdict: GateVerdict, fields: &Measurements) {
        if let Ok(mut records) = self.records.lock() {
            records.push(GateRecord {
                gate: gate.to_string(),
                verdict,
                fields: fields.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurements_display_and_lookup() {
        let m = Measurements::new().with("adx", 31.25).with("threshold", 25.0);
        assert_eq!(m.get("adx"), Some(31.25));
        assert_eq!(m.get("missing"), None);
        assert_eq!(m.to_string(), "adx=31.2500 threshold=25.0000");
    }

    #[test]
    fn test_recording_diagnostics() {
        let sink = RecordingDiagnostics::new();
        sink.record("min_bars", GateVerdict::Pass, &Measurements::new().with("bars", 50.0));
        sink.record("cooldown", GateVerdict::Reject, &Measurements::new().with("elapsed", 1.0));
        assert_eq!(sink.records().len(), 2);
        let rejections = sink.rejections();
        assert_eq!(rejections.len(), 1);
        assert_eq!(rejections[0].gate, "cooldown");
        sink.clear();
        assert!(sink.records().is_empty());
    }
}
