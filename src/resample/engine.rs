//! Batch resampling state machine
//!
//! One engine turns one input file (raw bars or a lower timeframe's dataset)
//! into one timeframe's dataset. Each batch goes through
//! `Reading -> Bucketing -> Committing` and ends with an index commit:
//!
//! 1. move the write position back to the committed `output_offset`
//! 2. write confirmed candles over the old provisional bytes; their end is
//!    the next `output_offset`
//! 3. write the provisional region (held-back and trailing candles) after it
//! 4. cut the file at the end of the provisional region
//! 5. atomically replace the index with `(input_offset, output_offset)`
//!
//! The committed region is never rewritten and the file never shrinks below
//! the old provisional end before the cut, so concurrent readers always see
//! whole rows. `input_offset` points at the first input bar of the
//! provisional region, so a restart rebuilds that region from input and
//! never double counts.

use super::bucket::{Bucketer, Candle};
use super::merge::{apply_merge_rules, MergeRule};
use crate::codec::{open_reader, open_writer, BarWriter, PositionedBar};
use crate::config::ResampleSymbolConfig;
use crate::error::{ProcessingError, WorkerError};
use crate::index::{CheckpointIndex, Offsets};
use crate::metrics::ResampleRunMetrics;
use crate::shutdown::{stop_requested, SharedShutdown};
use crate::{Error, Result};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not running
    Idle,
    /// Reading the next input batch
    Reading,
    /// Grouping pending bars into candles
    Bucketing,
    /// Writing candles and the index
    Committing,
    /// Last run ended with an error
    Failed,
}

/// Files and identity of one engine
#[derive(Debug, Clone)]
pub struct EngineJob {
    /// Symbol
    pub symbol: String,
    /// Target timeframe ident
    pub timeframe: String,
    /// Input bars
    pub input_path: PathBuf,
    /// Duration of one input bar in ms
    pub input_duration_ms: u64,
    /// Dataset written by the engine
    pub output_path: PathBuf,
    /// Checkpoint index of the dataset
    pub index_path: PathBuf,
}

/// Outcome of one engine run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Symbol
    pub symbol: String,
    /// Target timeframe
    pub timeframe: String,
    /// Batches read
    pub batches: u64,
    /// Input bars read
    pub bars_read: u64,
    /// Confirmed candles appended
    pub candles_committed: u64,
    /// Committed input offset at the end of the run
    pub input_offset: u64,
    /// Committed output offset at the end of the run
    pub output_offset: u64,
    /// Whether the run stopped early on a shutdown request
    pub interrupted: bool,
}

struct Commit {
    offsets: Offsets,
    candles: u64,
}

/// Resampling engine of one (symbol, timeframe)
pub struct ResampleEngine {
    job: EngineJob,
    config: ResampleSymbolConfig,
    bucketer: Bucketer,
    rules: Vec<MergeRule>,
    index: CheckpointIndex,
    input_limit: Option<u64>,
    expect_data: bool,
    fsync: bool,
    shutdown: Option<SharedShutdown>,
    state: EngineState,
}

impl ResampleEngine {
    /// Create an engine for `job`
    pub fn new(job: EngineJob, config: &ResampleSymbolConfig) -> Result<Self> {
        let bucketer = Bucketer::new(&job.timeframe, config, job.input_duration_ms)?;
        let rules = config.merge_rules(&job.timeframe);
        let index = CheckpointIndex::new(job.index_path.clone());
        Ok(Self {
            job,
            config: config.clone(),
            bucketer,
            rules,
            index,
            input_limit: None,
            expect_data: false,
            fsync: true,
            shutdown: None,
            state: EngineState::Idle,
        })
    }

    /// Never read input at or past `limit` (the source's committed offset)
    pub fn with_input_limit(mut self, limit: Option<u64>) -> Self {
        self.input_limit = limit;
        self
    }

    /// Fail with an empty-batch error when no new input is found
    pub fn expect_data(mut self, expect: bool) -> Self {
        self.expect_data = expect;
        self
    }

    /// Turn fsync of data and index on or off
    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self.index = self.index.with_fsync(fsync);
        self
    }

    /// Stop between batches once shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Current state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Job of this engine
    pub fn job(&self) -> &EngineJob {
        &self.job
    }

    /// Process all input available past the checkpoint
    pub fn run(&mut self) -> Result<RunSummary> {
        let span = tracing::info_span!(
            "resample_run",
            symbol = %self.job.symbol,
            timeframe = %self.job.timeframe,
        );
        let _enter = span.enter();

        let metrics = ResampleRunMetrics::start(&self.job.symbol, &self.job.timeframe);
        self.state = EngineState::Idle;
        match self.run_batches(&metrics) {
            Ok(summary) => {
                self.state = EngineState::Idle;
                metrics.record_complete();
                info!(
                    batches = summary.batches,
                    bars_read = summary.bars_read,
                    candles = summary.candles_committed,
                    input_offset = summary.input_offset,
                    output_offset = summary.output_offset,
                    "Resample run finished"
                );
                Ok(summary)
            }
            Err(e) if e.is_normal_termination() => {
                self.state = EngineState::Idle;
                debug!(error = %e, "Resample run ended without data");
                Err(e)
            }
            Err(e) => {
                self.state = EngineState::Failed;
                metrics.record_failure(&e.to_string());
                Err(e)
            }
        }
    }

    fn shutdown_requested(&self) -> bool {
        stop_requested(self.shutdown.as_ref())
    }

    /// Re-derive the committed output end from the file on disk
    fn recover(&self, writer: &mut dyn BarWriter, offsets: Offsets) -> Result<u64> {
        let committed = offsets.output_offset.max(writer.data_start());
        let on_disk = writer.tell();
        if on_disk < committed {
            return Err(Error::IndexCorruption {
                path: self.index.path().to_path_buf(),
                reason: format!(
                    "dataset {} holds {on_disk} bytes but {committed} are committed",
                    self.job.output_path.display()
                ),
            });
        }
        if on_disk > committed {
            debug!(
                committed,
                on_disk, "Rewriting provisional region from input"
            );
        }
        writer.rewind(committed)?;
        Ok(committed)
    }

    fn run_batches(&mut self, metrics: &ResampleRunMetrics) -> Result<RunSummary> {
        let offsets = self.index.read()?.offsets();
        if let Some(limit) = self.input_limit {
            if offsets.input_offset > limit {
                return Err(WorkerError::Dependency(format!(
                    "{} {} checkpoint {} is past its source's committed offset {limit}",
                    self.job.symbol, self.job.timeframe, offsets.input_offset
                ))
                .into());
            }
        }

        let mut writer = open_writer(&self.job.output_path, self.config.format)?;
        let mut output_offset = self.recover(writer.as_mut(), offsets)?;
        let mut input_offset = offsets.input_offset;

        let mut reader = open_reader(&self.job.input_path)?;
        reader.set_limit(self.input_limit);
        let mut cursor = input_offset.max(reader.data_start());

        let mut summary = RunSummary {
            symbol: self.job.symbol.clone(),
            timeframe: self.job.timeframe.clone(),
            ..Default::default()
        };
        let mut pending: Vec<PositionedBar> = Vec::new();

        loop {
            if self.shutdown_requested() {
                info!("Shutdown requested - stopping on commit boundary");
                summary.interrupted = true;
                break;
            }

            self.state = EngineState::Reading;
            let batch = reader.read_batch(cursor, self.config.batch_size)?;
            if batch.is_empty() {
                if summary.bars_read == 0 && self.expect_data {
                    return Err(ProcessingError::EmptyBatch { offset: cursor }.into());
                }
                break;
            }
            for positioned in &batch.bars {
                positioned
                    .bar
                    .validate()
                    .map_err(|reason| Error::invalid_record(positioned.position, reason))?;
            }
            summary.batches += 1;
            summary.bars_read += batch.len() as u64;
            let batch_len = batch.len() as u64;
            cursor = batch.next_offset;
            pending.extend(batch.bars);

            self.state = EngineState::Bucketing;
            let candles = self.bucketer.bucket(&pending, cursor)?;

            self.state = EngineState::Committing;
            let commit = self.commit(writer.as_mut(), candles, output_offset, cursor)?;
            input_offset = commit.offsets.input_offset;
            output_offset = commit.offsets.output_offset;
            pending.retain(|p| p.position >= input_offset);
            summary.candles_committed += commit.candles;
            metrics.record_commit(batch_len, commit.candles, output_offset);

            debug!(
                input_offset,
                output_offset,
                candles = commit.candles,
                pending = pending.len(),
                "Committed batch"
            );
        }

        if summary.batches == 0 {
            // nothing rewrote the region past the committed end
            writer.truncate(output_offset)?;
        }
        writer.finalize()?;
        summary.input_offset = input_offset;
        summary.output_offset = output_offset;
        Ok(summary)
    }

    fn commit(
        &self,
        writer: &mut dyn BarWriter,
        candles: Vec<Candle>,
        output_offset: u64,
        cursor: u64,
    ) -> Result<Commit> {
        let boundary = commit_boundary(&candles, &self.rules);
        let input_offset = candles.get(boundary).map_or(cursor, |c| c.first_offset);

        let mut confirmed = candles;
        let provisional = confirmed.split_off(boundary);
        let confirmed = apply_merge_rules(confirmed, &self.rules)?;
        let provisional = self.merge_provisional(provisional);

        writer.rewind(output_offset)?;
        for candle in &confirmed {
            writer.write_batch(std::slice::from_ref(&candle.bar), Some(candle.first_offset))?;
        }
        let new_output = writer.tell();
        for candle in &provisional {
            writer.write_batch(std::slice::from_ref(&candle.bar), Some(candle.first_offset))?;
        }
        let end = writer.tell();
        writer.truncate(end)?;
        writer.flush(self.fsync)?;

        let offsets = Offsets::new(input_offset, new_output);
        if let Err(e) = self.index.write(offsets) {
            warn!(error = %e, "Index commit failed after data write");
            return Err(WorkerError::Transaction {
                input_offset,
                output_offset: new_output,
                reason: e.to_string(),
            }
            .into());
        }

        Ok(Commit {
            offsets,
            candles: confirmed.len() as u64,
        })
    }

    /// Merge the provisional region for display.
    ///
    /// Rows whose anchor is not read yet cannot fold; they are kept out of
    /// the file and rebuilt from input once the anchor arrives.
    fn merge_provisional(&self, provisional: Vec<Candle>) -> Vec<Candle> {
        if self.rules.is_empty() {
            return provisional;
        }
        match apply_merge_rules(provisional.clone(), &self.rules) {
            Ok(merged) => merged,
            Err(e) => {
                debug!(error = %e, "Provisional rows left unmerged, withholding folded rows");
                provisional
                    .into_iter()
                    .filter(|c| !self.rules.iter().any(|r| r.matches(&c.key)))
                    .collect()
            }
        }
    }
}

/// Number of leading candles that can be committed.
///
/// Only closed candles qualify. Candles that a not-yet-seen row could fold
/// into are held back, and the boundary never separates a folded row from
/// its anchor.
pub fn commit_boundary(candles: &[Candle], rules: &[MergeRule]) -> usize {
    let closed = candles.iter().take_while(|c| c.closed).count();
    let hold = rules
        .iter()
        .filter(|r| r.offset < 0)
        .map(|r| r.offset.unsigned_abs() as usize)
        .max()
        .unwrap_or(0);
    let mut boundary = closed.saturating_sub(hold);

    loop {
        let mut next = boundary;
        for (i, candle) in candles.iter().enumerate() {
            for rule in rules.iter().filter(|r| r.matches(&candle.key)) {
                let anchor = i as i64 + rule.offset;
                let (row_in, anchor_in) = (i < next, anchor < next as i64);
                if row_in != anchor_in {
                    // cut before whichever of the pair comes first
                    next = next.min(i.min(anchor.max(0) as usize));
                }
            }
        }
        // multi-day candles interleave: a committed candle must not own
        // input past the restart point
        if let Some(first) = candles.get(next) {
            if let Some(i) = candles[..next]
                .iter()
                .position(|c| c.next_offset > first.first_offset)
            {
                next = i;
            }
        }
        if next == boundary {
            return boundary;
        }
        boundary = next;
    }
}
