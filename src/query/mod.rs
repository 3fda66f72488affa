//! Reading datasets back
//!
//! [`QueryEngine::get_data`] resolves a dataset through the shared registry,
//! reads a warmup-extended slice and joins indicator columns onto the rows.

pub mod engine;
pub mod indicator;

pub use engine::{
    plan_slice, Modifier, QueryEngine, QueryOptions, QueryRequest, QueryRow, SliceBounds,
    SortOrder,
};
pub use indicator::{
    ColumnValues, Indicator, IndicatorColumn, IndicatorMeta, IndicatorOptions, IndicatorRegistry,
    IndicatorRequest, Sma, ZScore,
};
