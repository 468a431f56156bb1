//! In-memory log source

use crate::model::DateRange;
use crate::source::error::{SourceError, SourceResult};
use crate::source::record::{RawRecord, RecordPredicate};
use crate::source::{LogSource, QueryPosition, RecordStream};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

/// Records held in memory, in source order (not necessarily date order)
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    records: Vec<RawRecord>,
    bulk_streaming: bool,
    fail_streams: bool,
    fail_queries: bool,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, records: Vec<RawRecord>) -> Self {
        Self {
            name: name.into(),
            records,
            bulk_streaming: true,
            fail_streams: false,
            fail_queries: false,
        }
    }

    /// Report that bulk streaming is not available
    pub fn without_bulk_streaming(mut self) -> Self {
        self.bulk_streaming = false;
        self
    }

    /// Make every stream fail after yielding its first record
    pub fn with_failing_streams(mut self) -> Self {
        self.fail_streams = true;
        self
    }

    /// Make every predicate query fail
    pub fn with_failing_queries(mut self) -> Self {
        self.fail_queries = true;
        self
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl LogSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn archive_range(&self) -> SourceResult<Option<DateRange>> {
        let first = self.records.iter().map(|r| r.date).min();
        let last = self.records.iter().map(|r| r.date).max();
        Ok(first.zip(last).map(|(first, last)| DateRange::covering(first, last)))
    }

    fn supports_bulk_streaming(&self) -> bool {
        self.bulk_streaming
    }

    async fn stream(&self, range: DateRange) -> SourceResult<RecordStream> {
        if !self.bulk_streaming {
            return Err(SourceError::Unavailable(format!(
                "{} does not support bulk streaming",
                self.name
            )));
        }

        let mut items: Vec<SourceResult<RawRecord>> = self
            .records
            .iter()
            .filter(|r| range.contains(r.date))
            .cloned()
            .map(Ok)
            .collect();

        if self.fail_streams {
            items.truncate(1);
            items.push(Err(SourceError::Stream(format!(
                "{} stream interrupted",
                self.name
            ))));
        }

        Ok(stream::iter(items).boxed())
    }

    async fn query(
        &self,
        predicate: &RecordPredicate,
        position: QueryPosition,
    ) -> SourceResult<Vec<RawRecord>> {
        if self.fail_queries {
            return Err(SourceError::Unavailable(format!(
                "{} rejected the query",
                self.name
            )));
        }

        Ok(self
            .records
            .iter()
            .filter(|r| position.admits(r.date) && predicate.matches(r))
            .cloned()
            .collect())
    }
}
