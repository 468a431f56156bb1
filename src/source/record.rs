//! Native records and source-side predicates

use crate::model::{Entry, EntryType, LogLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Native event type of an activity creation
pub const EVENT_TYPE_ACTIVITY: u64 = 513;
/// Native event type of a log message
pub const EVENT_TYPE_LOG: u64 = 1024;

/// A record as delivered by the logging subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    #[serde(rename = "type")]
    pub event_type: u64,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub composed_message: String,
    #[serde(default)]
    pub process: Option<String>,
    #[serde(default)]
    pub process_identifier: i32,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub activity_identifier: u64,
    #[serde(default)]
    pub thread_identifier: u64,
    #[serde(default)]
    pub log_type: u64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subsystem: Option<String>,
    #[serde(default)]
    pub parent_activity_identifier: u64,
}

impl RawRecord {
    /// A log record with only the required fields set
    pub fn log(date: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            event_type: EVENT_TYPE_LOG,
            date,
            composed_message: message.into(),
            process: None,
            process_identifier: 0,
            sender: String::new(),
            activity_identifier: 0,
            thread_identifier: 0,
            log_type: 0,
            category: None,
            subsystem: None,
            parent_activity_identifier: 0,
        }
    }

    /// An activity creation record
    pub fn activity(date: DateTime<Utc>, id: u64, parent: u64, name: impl Into<String>) -> Self {
        Self {
            event_type: EVENT_TYPE_ACTIVITY,
            activity_identifier: id,
            parent_activity_identifier: parent,
            ..Self::log(date, name)
        }
    }

    /// Convert to an entry. Event types other than logs and activities
    /// (signposts, state dumps, ...) yield `None`.
    pub fn to_entry(&self) -> Option<Entry> {
        let entry_type = match self.event_type {
            EVENT_TYPE_LOG => EntryType::Log,
            EVENT_TYPE_ACTIVITY => EntryType::Activity,
            _ => return None,
        };
        let is_log = entry_type == EntryType::Log;

        Some(Entry {
            entry_type,
            date: self.date,
            message: self.composed_message.clone(),
            activity_id: self.activity_identifier,
            process: self.process.clone().unwrap_or_default(),
            pid: self.process_identifier,
            sender: self.sender.clone(),
            thread_id: self.thread_identifier,
            level: is_log.then(|| LogLevel::from_raw(self.log_type)),
            subsystem: self.subsystem.clone(),
            category: self.category.clone(),
            parent_activity_id: if !is_log && self.parent_activity_identifier != 0 {
                Some(self.parent_activity_identifier)
            } else {
                None
            },
        })
    }
}

/// Boolean predicate over raw-record fields, evaluated by the source
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPredicate {
    Always,
    /// Native event type equals
    EventType(u64),
    /// Subsystem is one of these
    SubsystemIn(Vec<String>),
    Not(Box<RecordPredicate>),
    And(Vec<RecordPredicate>),
    Or(Vec<RecordPredicate>),
}

impl RecordPredicate {
    pub fn not(predicate: RecordPredicate) -> Self {
        RecordPredicate::Not(Box::new(predicate))
    }

    pub fn matches(&self, record: &RawRecord) -> bool {
        match self {
            RecordPredicate::Always => true,
            RecordPredicate::EventType(event_type) => record.event_type == *event_type,
            RecordPredicate::SubsystemIn(subsystems) => record
                .subsystem
                .as_ref()
                .map(|s| subsystems.iter().any(|candidate| candidate == s))
                .unwrap_or(false),
            RecordPredicate::Not(inner) => !inner.matches(record),
            RecordPredicate::And(all) => all.iter().all(|p| p.matches(record)),
            RecordPredicate::Or(any) => any.iter().any(|p| p.matches(record)),
        }
    }
}
