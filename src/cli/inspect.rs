//! Dataset listing and checkpoint inspection

use super::{Cli, CliError, OutputFormat};
use crate::codec::StorageFormat;
use crate::index::CheckpointIndex;
use crate::layout::StorageLayout;
use crate::lock::FileLockManager;
use crate::registry::DatasetRegistry;
use clap::{Args, Subcommand};
use serde_json::json;
use tracing::info;

/// Datasets arguments
#[derive(Debug, Args)]
pub struct DatasetsCommand {
    /// Only list datasets of this symbol
    pub symbol: Option<String>,
}

impl DatasetsCommand {
    /// Print every discovered dataset with its committed offsets
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let registry = DatasetRegistry::discover(&cli.data_dir)?;
        let datasets: Vec<_> = registry
            .get_available_datasets()
            .into_iter()
            .filter(|d| self.symbol.as_deref().map_or(true, |s| s == d.symbol))
            .collect();

        let mut rows = Vec::with_capacity(datasets.len());
        for dataset in datasets {
            let index = CheckpointIndex::new(dataset.index_path());
            let offsets = if index.exists() {
                Some(index.read()?.offsets())
            } else {
                None
            };
            rows.push((dataset, offsets));
        }

        match cli.output_format {
            OutputFormat::Json => {
                let values: Vec<serde_json::Value> = rows
                    .iter()
                    .map(|(d, offsets)| {
                        json!({
                            "symbol": d.symbol,
                            "timeframe": d.timeframe,
                            "format": d.format.to_string(),
                            "path": d.path.display().to_string(),
                            "input_offset": offsets.map(|o| o.input_offset),
                            "output_offset": offsets.map(|o| o.output_offset),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&values)?);
            }
            OutputFormat::Human => {
                println!("Found {} datasets:\n", rows.len());
                for (d, offsets) in &rows {
                    let committed = offsets
                        .map(|o| format!("input={} output={}", o.input_offset, o.output_offset))
                        .unwrap_or_else(|| "no index".to_string());
                    println!("{} | {} | {} | {}", d.symbol, d.timeframe, d.format, committed);
                }
            }
        }
        Ok(())
    }
}

/// Index arguments
#[derive(Debug, Args)]
pub struct IndexCommand {
    #[command(subcommand)]
    action: IndexAction,
}

#[derive(Debug, Subcommand)]
enum IndexAction {
    /// Print the committed offsets
    Show(IndexTarget),
    /// Reset the offsets to zero so the next run rebuilds the dataset
    Reset(IndexTarget),
}

#[derive(Debug, Args)]
struct IndexTarget {
    /// Symbol
    symbol: String,
    /// Timeframe ident
    timeframe: String,
    /// Dataset encoding
    #[arg(long, default_value = "binary")]
    format: StorageFormat,
}

impl IndexCommand {
    /// Show or reset one checkpoint index
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let layout = StorageLayout::new(&cli.data_dir);
        match &self.action {
            IndexAction::Show(target) => {
                let path = layout.index_path(target.format, &target.timeframe, &target.symbol);
                let index = CheckpointIndex::new(&path);
                if !index.exists() {
                    return Err(crate::Error::DataNotFound {
                        symbol: target.symbol.clone(),
                        timeframe: target.timeframe.clone(),
                    }
                    .into());
                }
                let offsets = index.read()?.offsets();
                match cli.output_format {
                    OutputFormat::Json => println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "path": path.display().to_string(),
                            "input_offset": offsets.input_offset,
                            "output_offset": offsets.output_offset,
                        }))?
                    ),
                    OutputFormat::Human => println!(
                        "{}: input_offset={} output_offset={}",
                        path.display(),
                        offsets.input_offset,
                        offsets.output_offset
                    ),
                }
            }
            IndexAction::Reset(target) => {
                let path = layout.index_path(target.format, &target.timeframe, &target.symbol);
                let locks = FileLockManager::new(layout.locks_dir());
                let today = chrono::Utc::now().date_naive();
                locks.with_lock(&target.symbol, today, || {
                    CheckpointIndex::new(&path).reset()
                })?;
                info!(path = %path.display(), "Checkpoint index reset");
                println!("{}: reset", path.display());
            }
        }
        Ok(())
    }
}
