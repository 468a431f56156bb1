//! Filter stages
//!
//! Each stage maps one cached layer to the next. They are plain functions
//! so the view can run them outside its lock.

use crate::model::{Activity, ActivityTree, DateRange, EntryList, SharedEntry};
use crate::query::{fold, Matcher, Subquery};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Entries within `range` (half-open), by binary search over the sorted
/// list. The whole list comes back as the same allocation when nothing is
/// cut off.
pub fn slice_by_date(entries: &EntryList, range: Option<DateRange>) -> EntryList {
    let Some(range) = range else {
        return Arc::clone(entries);
    };
    let lo = entries.partition_point(|e| e.date < range.start);
    let hi = entries.partition_point(|e| e.date < range.end).max(lo);
    if lo == 0 && hi == entries.len() {
        Arc::clone(entries)
    } else {
        Arc::new(entries[lo..hi].to_vec())
    }
}

/// Entries matching `query`, evaluated in `batches` parallel batches and
/// reassembled in order. `None` when cancelled.
pub fn filter_by_query(
    entries: &EntryList,
    query: Option<&Subquery>,
    batches: usize,
    cancel: &CancellationToken,
) -> Option<EntryList> {
    let Some(query) = query else {
        return Some(Arc::clone(entries));
    };
    if entries.is_empty() {
        return Some(Arc::clone(entries));
    }

    let matcher = Matcher::compile(query);
    let batch_size = entries.len().div_ceil(batches.max(1));
    let parts: Option<Vec<Vec<SharedEntry>>> = entries
        .par_chunks(batch_size)
        .map(|batch| {
            if cancel.is_cancelled() {
                return None;
            }
            Some(
                batch
                    .iter()
                    .filter(|e| matcher.matches(e))
                    .cloned()
                    .collect(),
            )
        })
        .collect();

    parts.map(|parts| Arc::new(parts.into_iter().flatten().collect()))
}

/// Entries belonging to a selected activity or any of its descendants.
/// An empty selection passes everything through.
pub fn filter_by_activities(
    entries: &EntryList,
    tree: &ActivityTree,
    selected: &HashSet<u64>,
) -> EntryList {
    if selected.is_empty() {
        return Arc::clone(entries);
    }
    let closure = tree.closure(selected);
    Arc::new(
        entries
            .iter()
            .filter(|e| closure.contains(&e.activity_id))
            .cloned()
            .collect(),
    )
}

/// Activities to list, in tree order.
///
/// A node is listed when the query is empty or one of its subtree's ids owns
/// a query-matching entry, and its name contains `name_filter` (folded). A
/// listed node's subtree is not searched further.
pub fn list_activities(
    tree: &ActivityTree,
    matched_ids: Option<&HashSet<u64>>,
    name_filter: &str,
) -> Vec<Activity> {
    let filter = fold(name_filter.trim()).into_owned();
    let mut listed = Vec::new();
    let mut seen = HashSet::new();
    for root in &tree.roots {
        visit(root, matched_ids, &filter, &mut seen, &mut listed);
    }
    listed
}

fn visit(
    node: &Activity,
    matched_ids: Option<&HashSet<u64>>,
    filter: &str,
    seen: &mut HashSet<u64>,
    listed: &mut Vec<Activity>,
) {
    if seen.contains(&node.id) {
        return;
    }

    let relevant = match matched_ids {
        None => true,
        Some(ids) => {
            let mut hit = false;
            node.walk(&mut |a| hit |= ids.contains(&a.id));
            hit
        }
    };
    let named = filter.is_empty() || fold(&node.name).contains(filter);

    if relevant && named {
        node.walk(&mut |a| {
            seen.insert(a.id);
        });
        listed.push(node.clone());
        return;
    }

    // Nothing below can match the query if this subtree has no hit
    if relevant {
        for child in node.children() {
            visit(child, matched_ids, filter, seen, listed);
        }
    }
}
