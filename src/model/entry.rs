//! Core entry types
//!
//! This module defines the fundamental values flowing through logscope:
//! - `Entry`: a single immutable log or activity record
//! - `EntryType` and `LogLevel`: classification enums
//! - `DateRange`: a half-open time interval used for chunks, windows and
//!   view selections

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared, immutable entry handle. Cache layers hold lists of these.
pub type SharedEntry = Arc<Entry>;

/// An ordered list of shared entries, cheap to hand between cache layers
pub type EntryList = Arc<Vec<SharedEntry>>;

/// Kind of record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// A regular log message
    Log,
    /// The creation of an activity
    Activity,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryType::Log => write!(f, "log"),
            EntryType::Activity => write!(f, "activity"),
        }
    }
}

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Default,
    Error,
    Fault,
}

impl LogLevel {
    /// All levels, least to most severe
    pub fn all() -> &'static [LogLevel] {
        &[
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Default,
            LogLevel::Error,
            LogLevel::Fault,
        ]
    }

    /// Map the native log type value. Unknown values are treated as `Default`.
    pub fn from_raw(raw: u64) -> Self {
        match raw {
            1 => LogLevel::Info,
            2 => LogLevel::Debug,
            16 => LogLevel::Error,
            17 => LogLevel::Fault,
            _ => LogLevel::Default,
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "default" | "notice" => Some(Self::Default),
            "error" => Some(Self::Error),
            "fault" => Some(Self::Fault),
            _ => None,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Default => write!(f, "default"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Fault => write!(f, "fault"),
        }
    }
}

/// A single log or activity record
///
/// Entries never change after creation; everything downstream shares them
/// through [`SharedEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub date: DateTime<Utc>,
    pub message: String,
    pub activity_id: u64,
    pub process: String,
    pub pid: i32,
    pub sender: String,
    pub thread_id: u64,
    #[serde(default)]
    pub level: Option<LogLevel>,
    #[serde(default)]
    pub subsystem: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Only ever set on activity entries
    #[serde(default)]
    pub parent_activity_id: Option<u64>,
}

impl Entry {
    /// Create a log entry with the required fields; everything else empty
    pub fn log(date: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Log,
            date,
            message: message.into(),
            activity_id: 0,
            process: String::new(),
            pid: 0,
            sender: String::new(),
            thread_id: 0,
            level: Some(LogLevel::Default),
            subsystem: None,
            category: None,
            parent_activity_id: None,
        }
    }

    /// Create an activity entry. The message is the activity name.
    pub fn activity(date: DateTime<Utc>, id: u64, name: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Activity,
            activity_id: id,
            level: None,
            ..Self::log(date, name)
        }
    }

    pub fn with_process(mut self, process: impl Into<String>, pid: i32) -> Self {
        self.process = process.into();
        self.pid = pid;
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_activity_id(mut self, activity_id: u64) -> Self {
        self.activity_id = activity_id;
        self
    }

    pub fn with_thread_id(mut self, thread_id: u64) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn with_parent(mut self, parent: u64) -> Self {
        self.parent_activity_id = Some(parent);
        self
    }

    pub fn is_activity(&self) -> bool {
        self.entry_type == EntryType::Activity
    }
}

/// Check that a list is sorted non-decreasing by date
pub fn is_sorted_by_date(entries: &[SharedEntry]) -> bool {
    entries.windows(2).all(|pair| pair[0].date <= pair[1].date)
}

/// Merge two date-sorted lists into one date-sorted list.
///
/// Ties keep entries from `left` first.
pub fn merge_sorted(left: &[SharedEntry], right: &[SharedEntry]) -> Vec<SharedEntry> {
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        if right[j].date < left[i].date {
            merged.push(Arc::clone(&right[j]));
            j += 1;
        } else {
            merged.push(Arc::clone(&left[i]));
            i += 1;
        }
    }
    merged.extend(left[i..].iter().cloned());
    merged.extend(right[j..].iter().cloned());
    merged
}

/// Half-open date interval: `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Create a range, returning None if `start > end`
    pub fn try_new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Smallest half-open range containing both instants
    pub fn covering(first: DateTime<Utc>, last: DateTime<Utc>) -> Self {
        let (start, last) = if first <= last { (first, last) } else { (last, first) };
        Self {
            start,
            end: last + Duration::nanoseconds(1),
        }
    }

    /// Range ending at `end` and reaching `interval` back
    pub fn ending_at(end: DateTime<Utc>, interval: Duration) -> Self {
        Self {
            start: end - interval,
            end,
        }
    }

    pub fn contains(&self, date: DateTime<Utc>) -> bool {
        date >= self.start && date < self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Smallest range containing both
    pub fn union(&self, other: &DateRange) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_log_level_raw_mapping() {
        assert_eq!(LogLevel::from_raw(0), LogLevel::Default);
        assert_eq!(LogLevel::from_raw(1), LogLevel::Info);
        assert_eq!(LogLevel::from_raw(2), LogLevel::Debug);
        assert_eq!(LogLevel::from_raw(16), LogLevel::Error);
        assert_eq!(LogLevel::from_raw(17), LogLevel::Fault);
        assert_eq!(LogLevel::from_raw(99), LogLevel::Default);
    }

    #[test]
    fn test_activity_entry_has_no_level() {
        let entry = Entry::activity(at(10), 7, "Load").with_parent(3);
        assert!(entry.is_activity());
        assert_eq!(entry.level, None);
        assert_eq!(entry.activity_id, 7);
        assert_eq!(entry.parent_activity_id, Some(3));
    }

    #[test]
    fn test_date_range_half_open() {
        let range = DateRange::try_new(at(10), at(20)).unwrap();
        assert!(!range.contains(at(9)));
        assert!(range.contains(at(10)));
        assert!(range.contains(at(19)));
        assert!(!range.contains(at(20)));
        assert!(DateRange::try_new(at(20), at(10)).is_none());
    }

    #[test]
    fn test_covering_includes_last_instant() {
        let range = DateRange::covering(at(10), at(20));
        assert!(range.contains(at(20)));
        assert!(range.contains(at(10)));
    }

    #[test]
    fn test_merge_sorted_keeps_order() {
        let left: Vec<SharedEntry> = [1, 4, 6]
            .iter()
            .map(|s| Arc::new(Entry::log(at(*s), "l")))
            .collect();
        let right: Vec<SharedEntry> = [2, 4, 9]
            .iter()
            .map(|s| Arc::new(Entry::log(at(*s), "r")))
            .collect();

        let merged = merge_sorted(&left, &right);
        assert_eq!(merged.len(), 6);
        assert!(is_sorted_by_date(&merged));
        // Ties prefer the left side
        assert_eq!(merged[2].message, "l");
        assert_eq!(merged[3].message, "r");
    }
}
