//! Entry and activity model
//!
//! - **entry**: `Entry`, `EntryType`, `LogLevel`, `DateRange`
//! - **activity**: `Activity` nodes and the two-pass tree rebuild

pub mod activity;
pub mod entry;

pub use activity::{Activity, ActivityTree};
pub use entry::{
    is_sorted_by_date, merge_sorted, DateRange, Entry, EntryList, EntryType, LogLevel,
    SharedEntry,
};
