//! Bar files: CSV, plain or zstd-compressed
//!
//! Columns: `timestamp,open,high,low,close,volume,spread` with RFC 3339
//! timestamps. `volume` and `spread` may be empty.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::trading_core::bars::Bar;

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    spread: Option<f64>,
}

fn is_zst(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "zst")
}

/// Symbol from a file name like "EURUSD_M15.csv.zst" or "nas100.csv"
pub fn symbol_from_path(path: &Path) -> Option<String> {
    let filename = path.file_name()?.to_string_lossy();
    let stem = filename.split(&['_', '-', '.'][..]).next()?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_ascii_uppercase())
}

/// Find bar files (.csv / .csv.zst) in a directory
pub fn find_bar_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read directory: {:?}", dir))? {
        let path = entry?.path();
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        if name.ends_with(".csv") || name.ends_with(".csv.zst") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Load, validate and time-sort bars
pub fn load_bars(path: &Path) -> Result<Vec<Bar>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    let reader: Box<dyn Read> = if is_zst(path) {
        Box::new(
            zstd::stream::Decoder::new(file)
                .with_context(|| format!("Failed to create zstd decoder for: {:?}", path))?,
        )
    } else {
        Box::new(file)
    };
    let bars = read_bars(BufReader::new(reader)).with_context(|| format!("Failed to load bars from {:?}", path))?;
    tracing::debug!("Loaded {} bars from {:?}", bars.len(), path);
    Ok(bars)
}

/// Parse bars from any CSV source
pub fn read_bars<R: Read>(reader: R) -> Result<Vec<Bar>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars = Vec::new();

    for (i, result) in csv_reader.deserialize().enumerate() {
        let row: CsvRow = result.with_context(|| format!("Failed to parse CSV row {}", i + 1))?;
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .with_context(|| format!("Failed to parse timestamp: {}", row.timestamp))?
            .with_timezone(&Utc);
        let bar = Bar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume.unwrap_or(0.0),
            spread: row.spread.unwrap_or(0.0),
        };
        bar.validate().with_context(|| format!("Invalid bar in row {} ({})", i + 1, row.timestamp))?;
        bars.push(bar);
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

/// Write bars in the load format; `.zst` paths are compressed
pub fn write_bars(path: &Path, bars: &[Bar]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create file: {:?}", path))?;
    if is_zst(path) {
        let encoder = zstd::stream::Encoder::new(file, 3)
            .with_context(|| format!("Failed to create zstd encoder for: {:?}", path))?;
        let encoder = write_rows(encoder, bars)?;
        encoder.finish().context("Failed to finish zstd stream")?;
    } else {
        let mut writer = write_rows(BufWriter::new(file), bars)?;
        writer.flush()?;
    }
    tracing::debug!("Wrote {} bars to {:?}", bars.len(), path);
    Ok(())
}

fn write_rows<W: Write>(writer: W, bars: &[Bar]) -> Result<W> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record(["timestamp", "open", "high", "low", "close", "volume", "spread"])?;
    for bar in bars {
        csv_writer.write_record([
            bar.timestamp.to_rfc3339(),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
            bar.spread.to_string(),
        ])?;
    }
    csv_writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV writer: {}", e.error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading_core::testing::linear_bars;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}", uuid::Uuid::new_v4(), name))
    }

    #[test]
    fn test_symbol_from_path() {
        assert_eq!(symbol_from_path(Path::new("/data/EURUSD_M15.csv.zst")), Some("EURUSD".to_string()));
        assert_eq!(symbol_from_path(Path::new("nas100.csv")), Some("NAS100".to_string()));
    }

    #[test]
    fn test_zstd_file_roundtrip() {
        let bars = linear_bars(50, 1.1000, 0.0005);
        let path = temp_path("EURUSD_M15.csv.zst");
        write_bars(&path, &bars).unwrap();
        let loaded = load_bars(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.len(), 50);
        assert_eq!(loaded[0].timestamp, bars[0].timestamp);
        assert!((loaded[49].close - bars[49].close).abs() < 1e-12);
    }

    #[test]
    fn test_rows_sorted_and_optional_columns() {
        let text = "timestamp,open,high,low,close,volume,spread\n\
                    2025-03-03T00:15:00Z,1.1,1.2,1.0,1.15,,\n\
                    2025-03-03T00:00:00+00:00,1.0,1.1,0.9,1.1,500,0.0001\n";
        let bars = read_bars(text.as_bytes()).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].volume, 500.0);
        assert_eq!(bars[1].volume, 0.0);
        assert!(bars[0].timestamp < bars[1].timestamp);
    }

    #[test]
    fn test_invalid_bar_rejected() {
        let text = "timestamp,open,high,low,close,volume,spread\n\
                    2025-03-03T00:00:00Z,1.0,0.9,1.1,1.0,100,0\n";
        let err = read_bars(text.as_bytes()).unwrap_err();
        assert!(format!("{:#}", err).contains("row 1"));
    }
}
