//! Filtered View
//!
//! A layered cache over the entry store:
//!
//! 1. **Date range**: binary search over the sorted store
//! 2. **Query**: parallel batch evaluation of the optimized query
//! 3. **Activity selection**: selected activities plus their descendants
//!
//! Each layer is invalidated only by its own inputs or by the layer above
//! it, so changing the activity selection never re-runs the query.

mod error;
mod filter;
mod filtered;

pub use error::{ViewError, ViewResult};
pub use filter::{filter_by_activities, filter_by_query, list_activities, slice_by_date};
pub use filtered::FilteredView;

use crate::search::DEFAULT_BATCH_SIZE;
use serde::Serialize;

/// Outcome of a regeneration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Regeneration {
    /// Results were committed
    Applied,
    /// A newer run or a filter change overtook this one; nothing committed
    Superseded,
}

/// Tuning for view regeneration
#[derive(Debug, Clone)]
pub struct ViewOptions {
    /// Parallel batches for query evaluation and statistics
    pub batches: usize,
    /// Entries per search-index build batch
    pub search_batch_size: usize,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            batches: 16,
            search_batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}
