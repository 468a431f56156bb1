//! Log Sources
//!
//! The external archive that raw records come from. A source offers two
//! capabilities:
//!
//! - **bulk streaming**: every record in a date range, as a stream that ends
//!   when the chunk is complete (fast, used by the chunked loader)
//! - **predicate query**: records matching a [`RecordPredicate`] from a start
//!   position, in source order (slow, used as a fallback)
//!
//! Both are fallible. Implementations:
//! - [`MemorySource`]: records held in memory
//! - [`JsonlOpener`]: opens JSON-lines archive files into memory sources

mod error;
mod jsonl;
mod memory;
mod record;

pub use error::{SourceError, SourceResult};
pub use jsonl::{load_jsonl, write_jsonl, JsonlOpener};
pub use memory::MemorySource;
pub use record::{RawRecord, RecordPredicate, EVENT_TYPE_ACTIVITY, EVENT_TYPE_LOG};

use crate::model::DateRange;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use std::sync::Arc;

/// Stream of raw records for one chunk; the end of the stream is the chunk's
/// completion signal
pub type RecordStream = BoxStream<'static, SourceResult<RawRecord>>;

/// Where a predicate query starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPosition {
    /// From the oldest record
    Start,
    /// From the first record at or after this date
    Date(DateTime<Utc>),
}

impl QueryPosition {
    pub fn admits(&self, date: DateTime<Utc>) -> bool {
        match self {
            QueryPosition::Start => true,
            QueryPosition::Date(start) => date >= *start,
        }
    }
}

/// An archive of raw log records
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Human-readable name (usually the archive location)
    fn name(&self) -> &str;

    /// Half-open range covering every record, or `None` for an empty archive
    async fn archive_range(&self) -> SourceResult<Option<DateRange>>;

    /// Whether [`LogSource::stream`] is available
    fn supports_bulk_streaming(&self) -> bool {
        true
    }

    /// Stream every record within `range`
    async fn stream(&self, range: DateRange) -> SourceResult<RecordStream>;

    /// Records matching `predicate`, starting at `position`, in source order
    async fn query(
        &self,
        predicate: &RecordPredicate,
        position: QueryPosition,
    ) -> SourceResult<Vec<RawRecord>>;
}

/// Resolves an archive URL into a source
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, url: &str) -> SourceResult<Arc<dyn LogSource>>;
}
