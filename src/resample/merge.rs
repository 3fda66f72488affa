//! Session post-process merging
//!
//! Rows produced by a session range that only covers the tail of a candle
//! (for example the after-midnight part of an overnight session) are folded
//! into an anchor row a fixed number of positions away and then dropped.

use super::bucket::Candle;
use crate::error::ProcessingError;
use crate::Result;

/// Fold rule of one timeframe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeRule {
    /// Key suffix of rows to fold
    pub ends_with: String,
    /// Anchor position relative to the folded row; never 0
    pub offset: i64,
}

impl MergeRule {
    /// Create a rule
    pub fn new(ends_with: String, offset: i64) -> Self {
        Self { ends_with, offset }
    }

    /// Whether `key` is folded by this rule
    pub fn matches(&self, key: &str) -> bool {
        key.ends_with(&self.ends_with)
    }
}

/// Apply every rule in order.
///
/// For a negative offset the anchor precedes the folded row and takes its
/// close. For a positive offset the anchor follows it, so the folded row
/// supplies the open and the anchor keeps its close. In both cases high is
/// the max, low the min and volumes add up. An anchor outside `rows`, or one
/// that was itself folded, is an error.
pub fn apply_merge_rules(rows: Vec<Candle>, rules: &[MergeRule]) -> Result<Vec<Candle>> {
    let mut rows = rows;
    for rule in rules {
        if rule.offset == 0 {
            return Err(ProcessingError::PostProcessing(format!(
                "merge rule {:?} has offset 0",
                rule.ends_with
            ))
            .into());
        }

        let mut folded = vec![false; rows.len()];
        for i in 0..rows.len() {
            if !rule.matches(&rows[i].key) {
                continue;
            }
            let anchor = i as i64 + rule.offset;
            if anchor < 0 || anchor >= rows.len() as i64 {
                return Err(ProcessingError::PostProcessing(format!(
                    "row {} ({}) folds into position {anchor}, outside a batch of {} rows",
                    i,
                    rows[i].key,
                    rows.len()
                ))
                .into());
            }
            let anchor = anchor as usize;
            if folded[anchor] {
                return Err(ProcessingError::PostProcessing(format!(
                    "row {} folds into {} which was already folded",
                    rows[i].key, rows[anchor].key
                ))
                .into());
            }

            let row = rows[i].clone();
            let target = &mut rows[anchor];
            if rule.offset < 0 {
                target.bar.absorb(&row.bar);
                target.end_ms = target.end_ms.max(row.end_ms);
                target.next_offset = target.next_offset.max(row.next_offset);
            } else {
                target.bar.open = row.bar.open;
                target.bar.high = target.bar.high.max(row.bar.high);
                target.bar.low = target.bar.low.min(row.bar.low);
                target.bar.volume += row.bar.volume;
                target.first_offset = target.first_offset.min(row.first_offset);
            }
            target.closed = target.closed && row.closed;
            folded[i] = true;
        }

        rows = rows
            .into_iter()
            .zip(folded)
            .filter_map(|(row, gone)| (!gone).then_some(row))
            .collect();
    }
    Ok(rows)
}
