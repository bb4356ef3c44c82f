use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use structure_edge::config::{InstrumentProfile, PipelineConfig};
use structure_edge::data;
use structure_edge::synth::{SyntheticConfig, SyntheticMarket};
use structure_edge::trading_core::diagnostics::{GateVerdict, RecordingDiagnostics};
use structure_edge::trading_core::lifecycle::{LifecycleStats, StatusChange};
use structure_edge::trading_core::pipeline::PipelineSet;
use structure_edge::trading_core::signal::TradingSignal;
use structure_edge::trading_core::Bar;
use structure_edge::types::Timeframe;

#[derive(Parser, Debug)]
#[command(name = "structure-edge")]
#[command(about = "Market-structure regime and pullback signal pipeline")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay bar files through the pipeline, printing JSON lines
    Replay {
        /// Bar files (.csv or .csv.zst); symbol taken from the file name
        #[arg(required_unless_present = "data_dir")]
        files: Vec<PathBuf>,

        /// Directory of bar files instead of explicit paths
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Pipeline config JSON
        #[arg(short, long, env = "STRUCTURE_EDGE_CONFIG")]
        config: Option<PathBuf>,

        /// Symbol for a single file whose name carries none
        #[arg(short, long)]
        symbol: Option<String>,

        /// Print per-gate rejection counts at the end
        #[arg(long)]
        gate_summary: bool,
    },

    /// Generate a synthetic bar file
    Synth {
        #[arg(short, long, default_value = "EURUSD")]
        symbol: String,

        #[arg(short, long, default_value_t = 2000)]
        bars: usize,

        #[arg(short, long, default_value = "M15")]
        timeframe: Timeframe,

        #[arg(long, default_value_t = 1.1)]
        start_price: f64,

        #[arg(long)]
        seed: Option<u64>,

        /// Output path; `.zst` compresses
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the default pipeline config as JSON
    Config,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplayEvent<'a> {
    Signal { symbol: &'a str, id: Uuid, signal: &'a TradingSignal },
    Transition { symbol: &'a str, change: &'a StatusChange },
    Stats { symbol: &'a str, bars: usize, errors: usize, stats: &'a LifecycleStats },
}

fn print_event(event: &ReplayEvent) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let default_directive = if args.verbose { "structure_edge=debug" } else { "structure_edge=info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_directive))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Replay { files, data_dir, config, symbol, gate_summary } => {
            run_replay(files, data_dir, config, symbol, gate_summary)?;
        }
        Commands::Synth { symbol, bars, timeframe, start_price, seed, output } => {
            run_synth(&symbol, bars, timeframe, start_price, seed, output)?;
        }
        Commands::Config => {
            println!("{}", PipelineConfig::default().to_json_pretty()?);
        }
    }

    Ok(())
}

fn run_replay(
    mut files: Vec<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    symbol: Option<String>,
    gate_summary: bool,
) -> Result<()> {
    let config = match config {
        Some(path) => PipelineConfig::from_json_file(&path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = data_dir {
        files.extend(data::find_bar_files(&dir)?);
    }
    if files.is_empty() {
        bail!("No bar files to replay");
    }
    if symbol.is_some() && files.len() > 1 {
        bail!("--symbol only applies to a single file");
    }

    let mut batch: Vec<(String, Bar)> = Vec::new();
    for path in &files {
        let name = match symbol.clone().or_else(|| data::symbol_from_path(path)) {
            Some(name) => name,
            None => bail!("Cannot derive a symbol from {:?}; pass --symbol", path),
        };
        let bars = data::load_bars(path)?;
        info!("{}: {} bars from {:?}", name, bars.len(), path);
        batch.extend(bars.into_iter().map(|b| (name.clone(), b)));
    }

    let recorder = Arc::new(RecordingDiagnostics::new());
    let mut set = PipelineSet::new(config);
    if gate_summary {
        set = set.with_diagnostics(recorder.clone());
    }

    let runs = set.process_batch(batch);
    let stats = set.stats();

    for (symbol, run) in &runs {
        for report in &run.reports {
            if let (Some(id), Some(signal)) = (report.created, report.detection.signal()) {
                print_event(&ReplayEvent::Signal { symbol, id, signal })?;
            }
            for change in &report.changes {
                print_event(&ReplayEvent::Transition { symbol, change })?;
            }
        }
        if let Some(stats) = stats.get(symbol) {
            print_event(&ReplayEvent::Stats {
                symbol,
                bars: run.reports.len(),
                errors: run.errors.len(),
                stats,
            })?;
        }
    }

    if gate_summary {
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in recorder.records() {
            if record.verdict == GateVerdict::Reject {
                *counts.entry(record.gate).or_default() += 1;
            }
        }
        println!("{}", serde_json::to_string(&serde_json::json!({ "type": "gate_summary", "rejections": counts }))?);
    }

    Ok(())
}

fn run_synth(
    symbol: &str,
    bars: usize,
    timeframe: Timeframe,
    start_price: f64,
    seed: Option<u64>,
    output: PathBuf,
) -> Result<()> {
    if !(start_price.is_finite() && start_price > 0.0) {
        bail!("start price must be positive, got {}", start_price);
    }
    let config = SyntheticConfig {
        timeframe,
        bars,
        start_price,
        seed,
        ..Default::default()
    };
    let profile = InstrumentProfile::for_symbol(symbol);
    let generated = SyntheticMarket::new(config, profile)?.generate();
    data::write_bars(&output, &generated).with_context(|| format!("Failed to write {:?}", output))?;
    info!("Wrote {} {} bars for {} to {:?}", generated.len(), timeframe, symbol, output);
    Ok(())
}
