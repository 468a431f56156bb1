//! Text Search Index
//!
//! Maps between an ordered entry list and the virtual concatenation of its
//! messages:
//!
//! ```text
//! messages:  "boot ok" "net up" "disk full"
//! offsets:   [0, 7)    [7, 13)  [13, 22)
//! ```
//!
//! Built in parallel fixed-size batches whose ranges start at 0; each batch is
//! then shifted by the total length of the batches before it.

use crate::model::EntryList;
use rayon::prelude::*;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::ops::Range;

/// Default number of entries per build batch
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// One row of the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRow {
    /// Byte range in the concatenation, half-open
    pub range: Range<usize>,
    pub row: usize,
}

/// A match found by [`SearchIndex::find_next`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub row: usize,
    /// Absolute byte range of the match
    pub range: Range<usize>,
}

/// Offset index over an entry list's messages
#[derive(Debug, Clone, Default)]
pub struct SearchIndex {
    entries: EntryList,
    rows: Vec<SearchRow>,
    len: usize,
}

impl SearchIndex {
    pub fn build(entries: EntryList) -> Self {
        Self::build_with_batch_size(entries, DEFAULT_BATCH_SIZE)
    }

    pub fn build_with_batch_size(entries: EntryList, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);

        let batches: Vec<(Vec<Range<usize>>, usize)> = entries
            .par_chunks(batch_size)
            .map(|batch| {
                let mut offset = 0;
                let ranges = batch
                    .iter()
                    .map(|entry| {
                        let start = offset;
                        offset += entry.message.len();
                        start..offset
                    })
                    .collect();
                (ranges, offset)
            })
            .collect();

        let mut rows = Vec::with_capacity(entries.len());
        let mut shift = 0;
        for (ranges, batch_len) in batches {
            for range in ranges {
                let row = rows.len();
                rows.push(SearchRow {
                    range: (range.start + shift)..(range.end + shift),
                    row,
                });
            }
            shift += batch_len;
        }

        Self {
            entries,
            rows,
            len: shift,
        }
    }

    /// Total length of the concatenation in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[SearchRow] {
        &self.rows
    }

    /// The entry list this index was built from
    pub fn entries(&self) -> &EntryList {
        &self.entries
    }

    pub fn message(&self, row: usize) -> Option<&str> {
        self.entries.get(row).map(|e| e.message.as_str())
    }

    /// Row whose range contains `offset`
    pub fn row_at(&self, offset: usize) -> Option<usize> {
        let index = self.rows.partition_point(|r| r.range.end <= offset);
        self.rows
            .get(index)
            .filter(|r| r.range.contains(&offset))
            .map(|r| r.row)
    }

    pub fn range_of_row(&self, row: usize) -> Option<Range<usize>> {
        self.rows.get(row).map(|r| r.range.clone())
    }

    /// Next case-insensitive match of `needle` at or after `from`, wrapping
    /// around to the beginning
    pub fn find_next(&self, needle: &str, from: usize) -> Option<SearchHit> {
        if needle.is_empty() || self.rows.is_empty() {
            return None;
        }
        let pattern = needle_pattern(needle)?;
        let from = if from >= self.len { 0 } else { from };
        let start_row = self.row_at(from).unwrap_or(0);

        // Forward from `from`, then wrap and finish the starting row
        let forward = (start_row..self.rows.len()).map(|row| (row, true));
        let wrapped = (0..=start_row).map(|row| (row, false));
        for (row, first_pass) in forward.chain(wrapped) {
            let range = &self.rows[row].range;
            let message = self.message(row)?;
            let local_from = if first_pass && row == start_row {
                from.saturating_sub(range.start).min(message.len())
            } else {
                0
            };
            if let Some(found) = pattern.find_at(message, local_from) {
                return Some(SearchHit {
                    row,
                    range: (range.start + found.start())..(range.start + found.end()),
                });
            }
        }
        None
    }
}

/// Literal, case-insensitive pattern for `needle`
fn needle_pattern(needle: &str) -> Option<Regex> {
    RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entry;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn index(messages: &[&str], batch: usize) -> SearchIndex {
        let entries: Vec<_> = messages
            .iter()
            .enumerate()
            .map(|(i, m)| Arc::new(Entry::log(Utc.timestamp_opt(i as i64, 0).unwrap(), *m)))
            .collect();
        SearchIndex::build_with_batch_size(Arc::new(entries), batch)
    }

    #[test]
    fn test_offsets_across_batches() {
        let index = index(&["boot ok", "net up", "disk full"], 2);
        assert_eq!(index.len(), 22);
        assert_eq!(index.range_of_row(0), Some(0..7));
        assert_eq!(index.range_of_row(1), Some(7..13));
        assert_eq!(index.range_of_row(2), Some(13..22));
        assert_eq!(index.range_of_row(3), None);
    }

    #[test]
    fn test_batch_size_does_not_change_result() {
        let messages: Vec<String> = (0..50).map(|i| "x".repeat(i % 7)).collect();
        let refs: Vec<&str> = messages.iter().map(String::as_str).collect();
        let single = index(&refs, 1000);
        let batched = index(&refs, 3);
        assert_eq!(single.rows(), batched.rows());
        assert_eq!(single.len(), batched.len());
    }

    #[test]
    fn test_row_at() {
        let index = index(&["abc", "", "de"], 2);
        assert_eq!(index.row_at(0), Some(0));
        assert_eq!(index.row_at(2), Some(0));
        // Empty rows are never hit
        assert_eq!(index.row_at(3), Some(2));
        assert_eq!(index.row_at(4), Some(2));
        assert_eq!(index.row_at(5), None);
    }

    #[test]
    fn test_find_next_wraps() {
        let index = index(&["Network up", "disk full", "network down"], 2);
        let first = index.find_next("NETWORK", 0).unwrap();
        assert_eq!(first.row, 0);
        assert_eq!(first.range, 0..7);

        let second = index.find_next("network", first.range.end).unwrap();
        assert_eq!(second.row, 2);
        assert_eq!(second.range, 19..26);

        let wrapped = index.find_next("network", second.range.end).unwrap();
        assert_eq!(wrapped.row, 0);

        assert!(index.find_next("absent", 0).is_none());
        assert!(index.find_next("", 0).is_none());
    }

    #[test]
    fn test_find_next_unicode() {
        let index = index(&["Grüße aus KÖLN", "abcabc"], 1);
        assert_eq!(index.find_next("köln", 0).unwrap().range, 12..17);

        // Starting inside the second row skips its first match
        let hit = index.find_next("ABC", 18).unwrap();
        assert_eq!(hit.row, 1);
        assert_eq!(hit.range, 20..23);

        assert!(index.find_next("abcd", 0).is_none());
    }

    #[test]
    fn test_find_next_is_literal() {
        let index = index(&["cost (USD) 1.5", "İstanbul"], 2);
        assert_eq!(index.find_next("(usd)", 0).unwrap().range, 5..10);
        assert_eq!(index.find_next("1.5", 0).unwrap().range, 11..14);
        assert!(index.find_next("1x5", 0).is_none());

        assert_eq!(index.find_next("stanbul", 0).unwrap().range, 16..23);
        // A dotted capital I does not fold to a plain i
        assert!(index.find_next("is", 0).is_none());
    }
}
