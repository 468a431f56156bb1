//! Sorted Entry Store
//!
//! The global, date-sorted list of every loaded entry. All mutations go
//! through one mutex and swap in a new immutable list, so readers holding a
//! snapshot are never affected by later loads.
//!
//! Each mutation bumps a generation counter and records the date span it
//! touched. Views use [`EntryStore::touched_since`] to decide whether a load
//! grew into their selected range.

use crate::model::{is_sorted_by_date, merge_sorted, DateRange, EntryList, SharedEntry};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Touched spans kept before the oldest ones are coalesced
const MAX_TOUCHED_SPANS: usize = 256;

#[derive(Debug, Default)]
struct StoreState {
    entries: EntryList,
    generation: u64,
    /// `(generation, span)` per mutation, oldest first
    touched: Vec<(u64, DateRange)>,
}

impl StoreState {
    fn commit(&mut self, entries: Vec<SharedEntry>, span: Option<DateRange>) -> u64 {
        self.entries = Arc::new(entries);
        self.generation += 1;
        if let Some(span) = span {
            self.touched.push((self.generation, span));
            if self.touched.len() > MAX_TOUCHED_SPANS {
                // Over-approximating is safe: it only invalidates more often
                let (_, first) = self.touched.remove(0);
                let (generation, second) = self.touched[0];
                self.touched[0] = (generation, first.union(&second));
            }
        }
        self.generation
    }
}

/// The sorted entry store
#[derive(Debug, Default)]
pub struct EntryStore {
    state: Mutex<StoreState>,
}

fn span_of(entries: &[SharedEntry]) -> Option<DateRange> {
    match (entries.first(), entries.last()) {
        (Some(first), Some(last)) => Some(DateRange::covering(first.date, last.date)),
        _ => None,
    }
}

fn union_of(a: Option<DateRange>, b: Option<DateRange>) -> Option<DateRange> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        (a, b) => a.or(b),
    }
}

fn sort_by_date(entries: &mut [SharedEntry]) {
    if !is_sorted_by_date(entries) {
        entries.sort_by_key(|e| e.date);
    }
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle, as held by databases and views
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Immutable snapshot of the current list
    pub fn snapshot(&self) -> EntryList {
        Arc::clone(&self.lock().entries)
    }

    /// Snapshot together with the generation it belongs to
    pub fn snapshot_with_generation(&self) -> (EntryList, u64) {
        let state = self.lock();
        (Arc::clone(&state.entries), state.generation)
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Date of the oldest entry
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.lock().entries.first().map(|e| e.date)
    }

    /// Half-open range covering every entry
    pub fn span(&self) -> Option<DateRange> {
        span_of(&self.lock().entries)
    }

    /// Union of the spans touched by mutations after `generation`.
    ///
    /// `None` means nothing changed since then.
    pub fn touched_since(&self, generation: u64) -> Option<DateRange> {
        self.lock()
            .touched
            .iter()
            .filter(|(g, _)| *g > generation)
            .fold(None, |acc, (_, span)| union_of(acc, Some(*span)))
    }

    /// Insert a sorted batch of entries older than everything in the store.
    ///
    /// A batch that overlaps the current contents is merged instead, so the
    /// store stays sorted either way. Returns the new generation.
    pub fn prepend(&self, mut batch: Vec<SharedEntry>) -> u64 {
        if batch.is_empty() {
            return self.generation();
        }
        sort_by_date(&mut batch);
        let span = span_of(&batch);

        let mut state = self.lock();
        let fits = match (batch.last(), state.entries.first()) {
            (Some(last), Some(first)) => last.date <= first.date,
            _ => true,
        };
        let entries = if fits {
            let mut entries = batch;
            entries.extend(state.entries.iter().cloned());
            entries
        } else {
            warn!(
                batch = batch.len(),
                "Prepended batch overlaps the store; merging"
            );
            merge_sorted(&batch, &state.entries)
        };
        let generation = state.commit(entries, span);
        debug!(generation, total = state.entries.len(), "Prepended entries");
        generation
    }

    /// Merge a batch into the store in one sorted merge
    pub fn merge_in(&self, mut batch: Vec<SharedEntry>) -> u64 {
        if batch.is_empty() {
            return self.generation();
        }
        sort_by_date(&mut batch);
        let span = span_of(&batch);

        let mut state = self.lock();
        let entries = merge_sorted(&state.entries, &batch);
        let generation = state.commit(entries, span);
        debug!(generation, total = state.entries.len(), "Merged entries");
        generation
    }

    /// Replace the contents outright
    pub fn replace(&self, mut entries: Vec<SharedEntry>) -> u64 {
        sort_by_date(&mut entries);
        let mut state = self.lock();
        let span = union_of(span_of(&state.entries), span_of(&entries));
        state.commit(entries, span)
    }

    /// Replace the contents only if `entries` reach further back than the
    /// store does (or the store is empty). Returns whether it replaced.
    pub fn replace_if_earlier(&self, mut entries: Vec<SharedEntry>) -> bool {
        sort_by_date(&mut entries);
        let Some(candidate) = entries.first().map(|e| e.date) else {
            return false;
        };

        let mut state = self.lock();
        let replace = match state.entries.first() {
            Some(current) => candidate < current.date,
            None => true,
        };
        if replace {
            let span = union_of(span_of(&state.entries), span_of(&entries));
            let generation = state.commit(entries, span);
            debug!(generation, total = state.entries.len(), "Replaced store contents");
        }
        replace
    }

    /// Move everything out, leaving the store empty
    pub fn take(&self) -> Vec<SharedEntry> {
        let mut state = self.lock();
        let span = span_of(&state.entries);
        let taken = std::mem::take(&mut state.entries);
        state.commit(Vec::new(), span);
        Arc::try_unwrap(taken).unwrap_or_else(|shared| shared.as_ref().clone())
    }
}
