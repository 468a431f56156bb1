//! The filtered view
//!
//! ```text
//! store ─date range→ in_range ─query→ query_filtered ─selection→ entries
//!                       │                   │
//!                       └─ tree ────────────┴──→ activities
//! ```
//!
//! Every layer is cached and invalidated on its own. Regenerations snapshot
//! their inputs under the lock, compute without it, and commit only if they
//! were neither cancelled nor overtaken by a setter in the meantime.

use crate::ingest::EntryStore;
use crate::model::{Activity, ActivityTree, DateRange, EntryList};
use crate::query::{parse_query, Subquery};
use crate::search::SearchIndex;
use crate::stats::EntryStats;
use crate::view::error::ViewResult;
use crate::view::filter::{filter_by_activities, filter_by_query, list_activities, slice_by_date};
use crate::view::{Regeneration, ViewOptions};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct DateLayer {
    entries: EntryList,
    /// Store generation the layer reflects
    generation: u64,
}

#[derive(Debug, Default)]
struct ViewState {
    /// Bumped by every setter
    revision: u64,

    date_range: Option<DateRange>,
    query: Option<Subquery>,
    selected: HashSet<u64>,
    name_filter: String,

    in_range: Option<DateLayer>,
    tree: Option<Arc<ActivityTree>>,
    query_filtered: Option<EntryList>,
    activity_filtered: Option<EntryList>,

    entries: EntryList,
    activities: Arc<Vec<Activity>>,
    search: Option<Arc<SearchIndex>>,
}

impl ViewState {
    fn invalidate_date_layer(&mut self) {
        self.in_range = None;
        self.tree = None;
        self.invalidate_query_layer();
    }

    fn invalidate_query_layer(&mut self) {
        self.query_filtered = None;
        self.invalidate_selection_layer();
    }

    fn invalidate_selection_layer(&mut self) {
        self.activity_filtered = None;
    }

    /// Drop the date layer if the store changed inside the selected range
    fn check_store(&mut self, store: &EntryStore, generation: u64) {
        let Some(layer) = &mut self.in_range else {
            return;
        };
        if layer.generation == generation {
            return;
        }
        let stale = match (store.touched_since(layer.generation), self.date_range) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(touched), Some(range)) => touched.overlaps(&range),
        };
        if stale {
            debug!(from = layer.generation, to = generation, "Store changed in range");
            self.invalidate_date_layer();
        } else {
            layer.generation = generation;
        }
    }

    /// Install a date layer, dropping dependents built from a different one
    fn commit_date_layer(&mut self, layer: DateLayer) {
        let same = self
            .in_range
            .as_ref()
            .map(|current| Arc::ptr_eq(&current.entries, &layer.entries))
            .unwrap_or(false);
        if !same {
            self.invalidate_date_layer();
        }
        self.in_range = Some(layer);
    }

    fn commit_tree(&mut self, tree: Arc<ActivityTree>) {
        if !self.tree.as_ref().map(|t| Arc::ptr_eq(t, &tree)).unwrap_or(false) {
            self.invalidate_selection_layer();
        }
        self.tree = Some(tree);
    }

    fn commit_query_layer(&mut self, entries: EntryList) {
        if !self
            .query_filtered
            .as_ref()
            .map(|current| Arc::ptr_eq(current, &entries))
            .unwrap_or(false)
        {
            self.invalidate_selection_layer();
        }
        self.query_filtered = Some(entries);
    }
}

/// Inputs and cached layers captured at the start of a regeneration
struct Snapshot {
    revision: u64,
    store_entries: EntryList,
    generation: u64,
    date_range: Option<DateRange>,
    query: Option<Subquery>,
    selected: HashSet<u64>,
    name_filter: String,
    in_range: Option<DateLayer>,
    tree: Option<Arc<ActivityTree>>,
    query_filtered: Option<EntryList>,
    activity_filtered: Option<EntryList>,
}

#[derive(Debug, Default)]
struct Runs {
    entries: Option<CancellationToken>,
    activities: Option<CancellationToken>,
}

/// Layered, cached view over an [`EntryStore`]
pub struct FilteredView {
    store: Arc<EntryStore>,
    options: ViewOptions,
    state: Mutex<ViewState>,
    runs: Mutex<Runs>,
}

impl FilteredView {
    pub fn new(store: Arc<EntryStore>) -> Self {
        Self::with_options(store, ViewOptions::default())
    }

    pub fn with_options(store: Arc<EntryStore>, options: ViewOptions) -> Self {
        Self {
            store,
            options,
            state: Mutex::new(ViewState::default()),
            runs: Mutex::new(Runs::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn runs(&self) -> MutexGuard<'_, Runs> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ----- Setters -----

    /// Select a date range; `None` selects the whole store
    pub fn set_date_range(&self, range: Option<DateRange>) {
        let mut state = self.state();
        if state.date_range != range {
            state.date_range = range;
            state.revision += 1;
            state.invalidate_date_layer();
        }
    }

    /// Set the top-level query. It is optimized first, so queries that only
    /// differ by empty rows count as unchanged.
    pub fn set_query(&self, query: Option<Subquery>) {
        let query = query.and_then(|q| q.optimize());
        let mut state = self.state();
        if state.query != query {
            state.query = query;
            state.revision += 1;
            state.invalidate_query_layer();
        }
    }

    /// Parse query text and set it; blank text clears the query
    pub fn set_query_text(&self, text: &str) -> ViewResult<()> {
        let query = parse_query(text)?;
        self.set_query(Some(query));
        Ok(())
    }

    pub fn set_selected_activities(&self, selected: HashSet<u64>) {
        let mut state = self.state();
        if state.selected != selected {
            state.selected = selected;
            state.revision += 1;
            state.invalidate_selection_layer();
        }
    }

    pub fn set_activity_name_filter(&self, filter: impl Into<String>) {
        let filter = filter.into();
        let mut state = self.state();
        if state.name_filter != filter {
            state.name_filter = filter;
            state.revision += 1;
        }
    }

    // ----- Accessors -----

    pub fn date_range(&self) -> Option<DateRange> {
        self.state().date_range
    }

    pub fn query(&self) -> Option<Subquery> {
        self.state().query.clone()
    }

    pub fn selected_activities(&self) -> HashSet<u64> {
        self.state().selected.clone()
    }

    /// Entries as of the last applied [`FilteredView::regenerate_entries`]
    pub fn entries(&self) -> EntryList {
        Arc::clone(&self.state().entries)
    }

    /// Activities as of the last applied [`FilteredView::regenerate_activities`]
    pub fn activities(&self) -> Arc<Vec<Activity>> {
        Arc::clone(&self.state().activities)
    }

    /// Search index over [`FilteredView::entries`], rebuilt when they change
    pub fn search_index(&self) -> Arc<SearchIndex> {
        let entries = {
            let state = self.state();
            if let Some(index) = &state.search {
                if Arc::ptr_eq(index.entries(), &state.entries) {
                    return Arc::clone(index);
                }
            }
            Arc::clone(&state.entries)
        };

        let index = Arc::new(SearchIndex::build_with_batch_size(
            Arc::clone(&entries),
            self.options.search_batch_size,
        ));
        let mut state = self.state();
        if Arc::ptr_eq(&state.entries, &entries) {
            state.search = Some(Arc::clone(&index));
        }
        index
    }

    pub fn stats(&self) -> EntryStats {
        EntryStats::compute(&self.entries(), self.options.batches)
    }

    /// Cancel any in-flight regeneration
    pub fn cancel(&self) {
        let mut runs = self.runs();
        for token in [runs.entries.take(), runs.activities.take()].into_iter().flatten() {
            token.cancel();
        }
    }

    // ----- Regeneration -----

    fn begin(&self, slot: fn(&mut Runs) -> &mut Option<CancellationToken>) -> CancellationToken {
        let token = CancellationToken::new();
        let mut runs = self.runs();
        if let Some(previous) = slot(&mut *runs).replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    fn snapshot(&self) -> Snapshot {
        let (store_entries, generation) = self.store.snapshot_with_generation();
        let mut state = self.state();
        state.check_store(&self.store, generation);
        Snapshot {
            revision: state.revision,
            store_entries,
            generation,
            date_range: state.date_range,
            query: state.query.clone(),
            selected: state.selected.clone(),
            name_filter: state.name_filter.clone(),
            in_range: state.in_range.clone(),
            tree: state.tree.clone(),
            query_filtered: state.query_filtered.clone(),
            activity_filtered: state.activity_filtered.clone(),
        }
    }

    /// Lock the state if `token` is live and no setter ran since `revision`
    fn commit_guard(
        &self,
        token: &CancellationToken,
        revision: u64,
    ) -> Option<MutexGuard<'_, ViewState>> {
        let state = self.state();
        if token.is_cancelled() || state.revision != revision {
            None
        } else {
            Some(state)
        }
    }

    fn date_layer(snapshot: &Snapshot) -> DateLayer {
        match &snapshot.in_range {
            Some(layer) => layer.clone(),
            None => DateLayer {
                entries: slice_by_date(&snapshot.store_entries, snapshot.date_range),
                generation: snapshot.generation,
            },
        }
    }

    /// Query layer, computed off the async runtime. `None` when cancelled.
    async fn query_layer(
        &self,
        snapshot: &Snapshot,
        in_range: &EntryList,
        token: &CancellationToken,
    ) -> ViewResult<Option<EntryList>> {
        if let Some(cached) = &snapshot.query_filtered {
            return Ok(Some(Arc::clone(cached)));
        }
        let entries = Arc::clone(in_range);
        let query = snapshot.query.clone();
        let batches = self.options.batches;
        let token = token.clone();
        let filtered = tokio::task::spawn_blocking(move || {
            filter_by_query(&entries, query.as_ref(), batches, &token)
        })
        .await?;
        Ok(filtered)
    }

    /// Recompute the entry list. Returns [`Regeneration::Superseded`] when a
    /// newer regeneration or a setter overtook this one; nothing is committed
    /// in that case.
    pub async fn regenerate_entries(&self) -> ViewResult<Regeneration> {
        let token = self.begin(|runs| &mut runs.entries);
        let started = Instant::now();
        let snapshot = self.snapshot();

        let date_layer = Self::date_layer(&snapshot);
        if token.is_cancelled() {
            return Ok(Regeneration::Superseded);
        }

        let Some(query_filtered) = self
            .query_layer(&snapshot, &date_layer.entries, &token)
            .await?
        else {
            return Ok(Regeneration::Superseded);
        };
        if token.is_cancelled() {
            return Ok(Regeneration::Superseded);
        }

        let mut tree = snapshot.tree.clone();
        let activity_filtered = match &snapshot.activity_filtered {
            Some(cached) => Arc::clone(cached),
            None if snapshot.selected.is_empty() => Arc::clone(&query_filtered),
            None => {
                let tree = tree.get_or_insert_with(|| {
                    Arc::new(ActivityTree::build(date_layer.entries.iter().map(|e| e.as_ref())))
                });
                filter_by_activities(&query_filtered, tree, &snapshot.selected)
            }
        };

        let Some(mut state) = self.commit_guard(&token, snapshot.revision) else {
            debug!("Entry regeneration superseded");
            return Ok(Regeneration::Superseded);
        };
        state.commit_date_layer(date_layer);
        if let Some(tree) = tree {
            state.commit_tree(tree);
        }
        state.commit_query_layer(query_filtered);
        state.activity_filtered = Some(Arc::clone(&activity_filtered));
        state.entries = activity_filtered;
        let count = state.entries.len();
        drop(state);

        info!(
            entries = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Regenerated entries"
        );
        Ok(Regeneration::Applied)
    }

    /// Recompute the activity list
    pub async fn regenerate_activities(&self) -> ViewResult<Regeneration> {
        let token = self.begin(|runs| &mut runs.activities);
        let started = Instant::now();
        let snapshot = self.snapshot();

        let date_layer = Self::date_layer(&snapshot);
        let tree = match &snapshot.tree {
            Some(tree) => Arc::clone(tree),
            None => Arc::new(ActivityTree::build(
                date_layer.entries.iter().map(|e| e.as_ref()),
            )),
        };
        if token.is_cancelled() {
            return Ok(Regeneration::Superseded);
        }

        let query_filtered = match &snapshot.query {
            None => None,
            Some(_) => match self
                .query_layer(&snapshot, &date_layer.entries, &token)
                .await?
            {
                Some(filtered) => Some(filtered),
                None => return Ok(Regeneration::Superseded),
            },
        };
        if token.is_cancelled() {
            return Ok(Regeneration::Superseded);
        }

        let matched_ids: Option<HashSet<u64>> = query_filtered
            .as_ref()
            .map(|entries| entries.iter().map(|e| e.activity_id).collect());
        let activities = list_activities(&tree, matched_ids.as_ref(), &snapshot.name_filter);

        let Some(mut state) = self.commit_guard(&token, snapshot.revision) else {
            debug!("Activity regeneration superseded");
            return Ok(Regeneration::Superseded);
        };
        state.commit_date_layer(date_layer);
        state.commit_tree(tree);
        if let Some(filtered) = query_filtered {
            state.commit_query_layer(filtered);
        }
        state.activities = Arc::new(activities);
        let count = state.activities.len();
        drop(state);

        info!(
            activities = count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Regenerated activities"
        );
        Ok(Regeneration::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entry, LogLevel, SharedEntry};
    use crate::query::Property;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn shared(entries: Vec<Entry>) -> Vec<SharedEntry> {
        entries.into_iter().map(Arc::new).collect()
    }

    fn store() -> Arc<EntryStore> {
        let store = EntryStore::shared();
        store.merge_in(shared(vec![
            Entry::activity(at(0), 1, "Launch").with_process("Otter", 10),
            Entry::activity(at(1), 2, "Load Config")
                .with_parent(1)
                .with_process("Otter", 10),
            Entry::log(at(2), "I am Otter, hear me roar.")
                .with_subsystem("com.jollycode.otter")
                .with_process("Otter", 10)
                .with_activity_id(2),
            Entry::activity(at(3), 3, "Fetch Feed").with_process("Otter", 10),
            Entry::log(at(4), "request timed out")
                .with_level(LogLevel::Error)
                .with_process("Otter", 10)
                .with_activity_id(3),
            Entry::log(at(5), "idle").with_process("kernel", 0),
        ]));
        store
    }

    fn messages(view: &FilteredView) -> Vec<String> {
        view.entries().iter().map(|e| e.message.clone()).collect()
    }

    #[tokio::test]
    async fn test_full_range_returns_identical_list() {
        let store = store();
        let view = FilteredView::new(Arc::clone(&store));
        view.set_date_range(store.span());
        assert_eq!(view.regenerate_entries().await.unwrap(), Regeneration::Applied);
        assert!(Arc::ptr_eq(&view.entries(), &store.snapshot()));
    }

    #[tokio::test]
    async fn test_layers_compose() {
        let view = FilteredView::new(store());
        view.set_date_range(DateRange::try_new(at(1), at(5)));
        view.set_query(Some(Subquery::equals(Property::Process, "otter")));
        view.regenerate_entries().await.unwrap();
        assert_eq!(
            messages(&view),
            vec!["Load Config", "I am Otter, hear me roar.", "Fetch Feed", "request timed out"]
        );

        view.set_selected_activities([3].into_iter().collect());
        view.regenerate_entries().await.unwrap();
        assert_eq!(messages(&view), vec!["Fetch Feed", "request timed out"]);

        view.set_selected_activities(HashSet::new());
        view.set_query(None);
        view.set_date_range(None);
        view.regenerate_entries().await.unwrap();
        assert_eq!(view.entries().len(), 6);
    }

    #[tokio::test]
    async fn test_otter_examples() {
        let view = FilteredView::new(store());

        view.set_query(Some(Subquery::contains(Property::Message, "hear me roar")));
        view.regenerate_entries().await.unwrap();
        assert_eq!(view.entries().len(), 1);

        view.set_query(Some(Subquery::equals(Property::Subsystem, "COM.JOLLYCODE.OTTER")));
        view.regenerate_entries().await.unwrap();
        assert_eq!(view.entries().len(), 1);

        view.set_query(Some(Subquery::and(vec![
            Subquery::does_not_contain(Property::Process, "Otter"),
            Subquery::contains(Property::Message, "roar"),
        ])));
        view.regenerate_entries().await.unwrap();
        assert_eq!(view.entries().len(), 0);
    }

    #[tokio::test]
    async fn test_store_growth_in_range_invalidates() {
        let store = store();
        let view = FilteredView::new(Arc::clone(&store));
        view.set_date_range(DateRange::try_new(at(0), at(100)));
        view.regenerate_entries().await.unwrap();
        assert_eq!(view.entries().len(), 6);

        // Outside the selected range: cached layer stays valid
        store.merge_in(shared(vec![Entry::log(at(500), "later")]));
        view.regenerate_entries().await.unwrap();
        assert_eq!(view.entries().len(), 6);

        store.merge_in(shared(vec![Entry::log(at(50), "inside")]));
        view.regenerate_entries().await.unwrap();
        assert_eq!(view.entries().len(), 7);
    }

    #[tokio::test]
    async fn test_whole_store_view_sees_growth() {
        let store = store();
        let view = FilteredView::new(Arc::clone(&store));
        view.regenerate_entries().await.unwrap();
        store.prepend(shared(vec![Entry::log(at(-10), "early")]));
        view.regenerate_entries().await.unwrap();
        assert_eq!(view.entries().len(), 7);
        assert_eq!(view.entries()[0].message, "early");
    }

    #[tokio::test]
    async fn test_activities() {
        let view = FilteredView::new(store());
        view.regenerate_activities().await.unwrap();
        let names: Vec<String> = view.activities().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["Launch", "Fetch Feed"]);
        assert_eq!(view.activities()[0].children().len(), 1);

        view.set_query(Some(Subquery::levels([LogLevel::Error])));
        view.regenerate_activities().await.unwrap();
        let names: Vec<String> = view.activities().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, vec!["Fetch Feed"]);

        view.set_query(None);
        view.set_activity_name_filter("config");
        view.regenerate_activities().await.unwrap();
        assert_eq!(view.activities().len(), 1);
        assert_eq!(view.activities()[0].id, 2);
    }

    #[tokio::test]
    async fn test_cancelled_run_commits_nothing() {
        let view = FilteredView::new(store());
        view.regenerate_entries().await.unwrap();
        let before = view.entries();

        view.set_query(Some(Subquery::contains(Property::Message, "idle")));
        let token = view.begin(|runs| &mut runs.entries);
        token.cancel();
        // A setter after the snapshot supersedes the run
        let snapshot = view.snapshot();
        view.set_query(Some(Subquery::contains(Property::Message, "roar")));
        assert!(view.commit_guard(&token, snapshot.revision).is_none());
        assert!(Arc::ptr_eq(&view.entries(), &before));

        assert_eq!(view.regenerate_entries().await.unwrap(), Regeneration::Applied);
        assert_eq!(messages(&view), vec!["I am Otter, hear me roar."]);
    }

    #[tokio::test]
    async fn test_concurrent_regenerations_settle() {
        let view = Arc::new(FilteredView::new(store()));
        view.set_query(Some(Subquery::contains(Property::Message, "o")));
        let (a, b) = tokio::join!(view.regenerate_entries(), view.regenerate_entries());
        let outcomes = [a.unwrap(), b.unwrap()];
        assert!(outcomes.contains(&Regeneration::Applied));
        assert!(view.entries().iter().all(|e| e.message.contains('o')));
    }

    #[tokio::test]
    async fn test_search_index_follows_entries() {
        let view = FilteredView::new(store());
        view.regenerate_entries().await.unwrap();
        let first = view.search_index();
        assert!(Arc::ptr_eq(&first, &view.search_index()));
        assert_eq!(first.row_count(), 6);

        view.set_query_text("level:error").unwrap();
        view.regenerate_entries().await.unwrap();
        let second = view.search_index();
        assert_eq!(second.row_count(), 1);
        assert_eq!(view.stats().level_count(LogLevel::Error), 1);
    }

    #[tokio::test]
    async fn test_invalid_query_text_keeps_query() {
        let view = FilteredView::new(store());
        view.set_query(Some(Subquery::contains(Property::Message, "roar")));
        assert!(view.set_query_text("message ~").is_err());
        assert!(view.query().is_some());
    }
}
