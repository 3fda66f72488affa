//! Resampling of raw bars into timeframe datasets
//!
//! - [`bucket`] groups bars into session-aware candles
//! - [`merge`] folds partial session rows into their anchors
//! - [`engine`] commits candles of one timeframe batch by batch
//! - [`pipeline`] runs every timeframe of a symbol in dependency order

pub mod bucket;
pub mod engine;
pub mod merge;
pub mod pipeline;

pub use bucket::{candle_key, Bucketer, Candle};
pub use engine::{commit_boundary, EngineJob, EngineState, ResampleEngine, RunSummary};
pub use merge::{apply_merge_rules, MergeRule};
pub use pipeline::{dependency_order, PipelineSummary, ResamplePipeline};
