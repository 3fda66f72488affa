//! Per-symbol orchestration of resampling engines
//!
//! Timeframes of a symbol run in dependency order: a timeframe with a
//! `source` hint reads the committed part of that source's dataset, every
//! other timeframe reads the raw input. A symbol is processed under its
//! writer lock for the current day. Symbols run in parallel on a rayon pool.

use super::engine::{EngineJob, ResampleEngine, RunSummary};
use crate::config::{ResampleConfig, ResampleSymbolConfig, ResampleTimeframe};
use crate::error::WorkerError;
use crate::index::CheckpointIndex;
use crate::layout::StorageLayout;
use crate::lock::FileLockManager;
use crate::shutdown::{stop_requested, SharedShutdown};
use crate::{Error, Result, Timeframe};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{error, info, warn};

/// Outcome of all timeframes of one symbol
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineSummary {
    /// Symbol
    pub symbol: String,
    /// One summary per timeframe, in run order
    pub runs: Vec<RunSummary>,
    /// Whether shutdown stopped the pipeline early
    pub interrupted: bool,
}

impl PipelineSummary {
    /// Candles committed across all timeframes
    pub fn candles_committed(&self) -> u64 {
        self.runs.iter().map(|r| r.candles_committed).sum()
    }

    /// Summary of one timeframe
    pub fn run(&self, timeframe: &str) -> Option<&RunSummary> {
        self.runs.iter().find(|r| r.timeframe == timeframe)
    }
}

/// Runs every configured timeframe of a symbol
pub struct ResamplePipeline {
    layout: StorageLayout,
    config: ResampleConfig,
    locks: FileLockManager,
    shutdown: Option<SharedShutdown>,
    fsync: bool,
}

impl ResamplePipeline {
    /// Pipeline over `layout` with `config`
    pub fn new(layout: StorageLayout, config: ResampleConfig) -> Self {
        let locks = FileLockManager::new(layout.locks_dir());
        Self {
            layout,
            config,
            locks,
            shutdown: None,
            fsync: true,
        }
    }

    /// Stop between batches and timeframes once shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Turn fsync of datasets and indexes on or off
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    /// Storage layout
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Configuration
    pub fn config(&self) -> &ResampleConfig {
        &self.config
    }

    fn shutdown_requested(&self) -> bool {
        stop_requested(self.shutdown.as_ref())
    }

    /// Resample every timeframe of `symbol` under its writer lock
    pub fn run_symbol(&self, symbol: &str) -> Result<PipelineSummary> {
        let span = tracing::info_span!("resample_symbol", symbol = %symbol);
        let _enter = span.enter();

        let config = self.config.symbol_config(symbol)?;
        let raw = self
            .layout
            .find_raw_input(symbol)
            .ok_or_else(|| Error::DataNotFound {
                symbol: symbol.to_string(),
                timeframe: "raw".to_string(),
            })?;
        let order = dependency_order(&config.timeframes)?;
        info!(timeframes = ?order, input = %raw.display(), "Starting resample pipeline");

        let today = chrono::Utc::now().date_naive();
        self.locks.with_lock(symbol, today, || {
            let mut summary = PipelineSummary {
                symbol: symbol.to_string(),
                ..Default::default()
            };
            for timeframe in &order {
                if self.shutdown_requested() {
                    let reason = self.shutdown.as_ref().and_then(|s| s.reason());
                    info!(reason = ?reason, "Stop requested, skipping remaining timeframes");
                    summary.interrupted = true;
                    break;
                }
                let run = self.run_timeframe(symbol, timeframe, &config, &raw)?;
                summary.interrupted |= run.interrupted;
                summary.runs.push(run);
                if summary.interrupted {
                    break;
                }
            }
            info!(
                candles = summary.candles_committed(),
                interrupted = summary.interrupted,
                "Resample pipeline finished"
            );
            Ok(summary)
        })
    }

    fn run_timeframe(
        &self,
        symbol: &str,
        timeframe: &str,
        config: &ResampleSymbolConfig,
        raw: &Path,
    ) -> Result<RunSummary> {
        let format = config.format;
        let source = config
            .timeframes
            .get(timeframe)
            .and_then(|hint| hint.source.clone());

        let (input_path, input_duration_ms, input_limit) = match source {
            Some(source) => {
                let path = self.layout.dataset_path(format, &source, symbol);
                if !path.is_file() {
                    return Err(WorkerError::Dependency(format!(
                        "{symbol} {timeframe} reads {source} but {} does not exist",
                        path.display()
                    ))
                    .into());
                }
                let index = CheckpointIndex::new(self.layout.index_path(format, &source, symbol));
                let committed = index.read()?.offsets().output_offset;
                (path, parse_ident(&source)?.duration_ms(), Some(committed))
            }
            None => (raw.to_path_buf(), config.input_timeframe()?.duration_ms(), None),
        };

        std::fs::create_dir_all(self.layout.timeframe_dir(format, timeframe))?;
        let job = EngineJob {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            input_path,
            input_duration_ms,
            output_path: self.layout.dataset_path(format, timeframe, symbol),
            index_path: self.layout.index_path(format, timeframe, symbol),
        };

        let mut engine = ResampleEngine::new(job, config)?
            .with_input_limit(input_limit)
            .with_fsync(self.fsync);
        if let Some(shutdown) = &self.shutdown {
            engine = engine.with_shutdown(shutdown.clone());
        }
        engine.run()
    }

    /// Run `symbols` on a pool of `threads` workers (rayon's default when `None`).
    ///
    /// One symbol failing does not stop the others; every outcome is returned
    /// in input order. Repeated symbols run once.
    pub fn run_symbols(
        &self,
        symbols: &[String],
        threads: Option<usize>,
    ) -> Result<Vec<(String, Result<PipelineSummary>)>> {
        let threads = threads.unwrap_or_else(rayon::current_num_threads).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| WorkerError::ForkProcess(format!("failed to build thread pool: {e}")))?;

        let mut seen = HashSet::new();
        let symbols: Vec<&String> = symbols
            .iter()
            .filter(|s| seen.insert(s.as_str()))
            .collect();

        info!(symbols = symbols.len(), threads, "Resampling symbols");
        let results: Vec<(String, Result<PipelineSummary>)> = pool.install(|| {
            symbols
                .par_iter()
                .map(|symbol| {
                    let outcome = self.run_symbol(symbol);
                    if let Err(e) = &outcome {
                        if e.is_fatal() {
                            error!(symbol = %symbol, error = %e, "Symbol failed");
                        } else {
                            warn!(symbol = %symbol, error = %e, "Symbol skipped");
                        }
                    }
                    (symbol.to_string(), outcome)
                })
                .collect()
        });
        Ok(results)
    }
}

fn parse_ident(ident: &str) -> Result<Timeframe> {
    ident
        .parse::<Timeframe>()
        .map_err(|e| Error::Config(format!("timeframe {ident:?}: {e}")))
}

/// Order timeframes so every `source` runs before its dependents.
///
/// Independent timeframes run shortest first. An unknown source or a cycle
/// is a dependency error.
pub fn dependency_order(timeframes: &BTreeMap<String, ResampleTimeframe>) -> Result<Vec<String>> {
    let mut idents: Vec<(u64, &String)> = Vec::with_capacity(timeframes.len());
    for ident in timeframes.keys() {
        idents.push((parse_ident(ident)?.duration_ms(), ident));
    }
    idents.sort();

    let mut order: Vec<String> = Vec::with_capacity(timeframes.len());
    let mut done: HashSet<&str> = HashSet::new();
    for (_, ident) in idents {
        let mut chain: Vec<&str> = Vec::new();
        let mut current = ident.as_str();
        // walk up the source chain until a finished or root timeframe
        loop {
            if done.contains(current) {
                break;
            }
            if chain.contains(&current) {
                return Err(WorkerError::Dependency(format!(
                    "timeframe {current} depends on itself through {}",
                    chain.join(" -> ")
                ))
                .into());
            }
            chain.push(current);
            let hint = timeframes.get(current).ok_or_else(|| {
                WorkerError::Dependency(format!(
                    "timeframe {} reads unknown source {current}",
                    chain[chain.len().saturating_sub(2)]
                ))
            })?;
            match hint.source.as_deref() {
                Some(source) => current = source,
                None => break,
            }
        }
        for ident in chain.into_iter().rev() {
            if done.insert(ident) {
                order.push(ident.to_string());
            }
        }
    }
    Ok(order)
}
