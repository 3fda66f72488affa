//! Resample command

use super::{Cli, CliError, OutputFormat};
use crate::config::ResampleConfig;
use crate::layout::{StorageLayout, RAW_DIR};
use crate::resample::{PipelineSummary, ResamplePipeline};
use crate::shutdown::SharedShutdown;
use clap::Args;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Resample arguments
#[derive(Debug, Args)]
pub struct ResampleCommand {
    /// Symbols to resample (default: every raw input under the data dir)
    pub symbols: Vec<String>,

    /// JSON configuration document
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads for independent symbols
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=256))]
    pub threads: Option<u16>,

    /// Skip fsync of datasets and indexes
    #[arg(long, default_value_t = false)]
    pub no_fsync: bool,
}

impl ResampleCommand {
    /// Run the pipeline for every requested symbol
    pub fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let config = match &self.config {
            Some(path) => ResampleConfig::load(path)?,
            None => ResampleConfig::default(),
        };
        let layout = StorageLayout::new(&cli.data_dir);
        let symbols = if self.symbols.is_empty() {
            raw_symbols(layout.root())?
        } else {
            self.symbols.clone()
        };
        if symbols.is_empty() {
            return Err(CliError::InvalidArgument(format!(
                "no symbols given and no raw input under {}",
                layout.root().join(RAW_DIR).display()
            )));
        }

        let pipeline = ResamplePipeline::new(layout, config)
            .with_shutdown(shutdown)
            .with_fsync(!self.no_fsync);
        let results = pipeline.run_symbols(&symbols, self.threads.map(usize::from))?;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        print_results(&results, cli.output_format)?;
        if failed > 0 {
            warn!(failed, total = results.len(), "Resample finished with failures");
            return Err(CliError::PartialFailure {
                failed,
                total: results.len(),
            });
        }
        info!(symbols = results.len(), "Resample finished");
        Ok(())
    }
}

/// Symbols with a raw input file
fn raw_symbols(root: &Path) -> Result<Vec<String>, CliError> {
    let dir = root.join(RAW_DIR);
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(crate::Error::from(e).into()),
    };
    let mut symbols = BTreeSet::new();
    for entry in entries {
        let path = entry.map_err(crate::Error::from)?.path();
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            symbols.insert(stem.to_string());
        }
    }
    Ok(symbols.into_iter().collect())
}

fn print_results(
    results: &[(String, crate::Result<PipelineSummary>)],
    format: OutputFormat,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = results
                .iter()
                .map(|(symbol, outcome)| match outcome {
                    Ok(summary) => json!({
                        "symbol": symbol,
                        "status": if summary.interrupted { "interrupted" } else { "ok" },
                        "candles_committed": summary.candles_committed(),
                        "timeframes": summary.runs.iter().map(|r| json!({
                            "timeframe": r.timeframe,
                            "batches": r.batches,
                            "bars_read": r.bars_read,
                            "candles_committed": r.candles_committed,
                            "input_offset": r.input_offset,
                            "output_offset": r.output_offset,
                        })).collect::<Vec<_>>(),
                    }),
                    Err(e) => json!({
                        "symbol": symbol,
                        "status": "failed",
                        "error": e.to_string(),
                    }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Human => {
            for (symbol, outcome) in results {
                match outcome {
                    Ok(summary) => {
                        println!(
                            "{symbol}: {} candles committed{}",
                            summary.candles_committed(),
                            if summary.interrupted { " (interrupted)" } else { "" }
                        );
                        for run in &summary.runs {
                            println!(
                                "  {:>4} | bars={} candles={} input_offset={} output_offset={}",
                                run.timeframe,
                                run.bars_read,
                                run.candles_committed,
                                run.input_offset,
                                run.output_offset
                            );
                        }
                    }
                    Err(e) => println!("{symbol}: FAILED {e}"),
                }
            }
        }
    }
    Ok(())
}
