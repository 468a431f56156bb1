//! Source registry and load orchestration

use crate::ingest::error::{IngestError, IngestResult};
use crate::ingest::progress::LoadCallbacks;
use crate::ingest::store::EntryStore;
use crate::ingest::{fast, slow, IngestOptions};
use crate::model::DateRange;
use crate::source::{LogSource, SourceOpener};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Default)]
struct Registry {
    /// Registration order
    urls: Vec<String>,
    loaded: HashSet<String>,
    in_progress: HashSet<String>,
    /// A load owns the main store and publishes into it directly
    direct_claimed: bool,
}

/// Clears a URL's in-progress mark however the load ends
struct InProgress<'a> {
    registry: &'a Mutex<Registry>,
    url: String,
    succeeded: bool,
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.in_progress.remove(&self.url);
        if self.succeeded {
            registry.loaded.insert(self.url.clone());
        }
    }
}

/// Outcome of [`Database::load_if_necessary`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub sources_loaded: usize,
    pub entries: usize,
}

/// Registered archives plus the store they load into
pub struct Database {
    store: Arc<EntryStore>,
    opener: Arc<dyn SourceOpener>,
    options: IngestOptions,
    registry: Mutex<Registry>,
    /// Held for the whole of a direct load; staged merges wait on it
    publish: tokio::sync::Mutex<()>,
}

impl Database {
    pub fn new(opener: Arc<dyn SourceOpener>) -> Self {
        Self::with_options(opener, IngestOptions::default())
    }

    pub fn with_options(opener: Arc<dyn SourceOpener>, options: IngestOptions) -> Self {
        Self {
            store: EntryStore::shared(),
            opener,
            options,
            registry: Mutex::new(Registry::default()),
            publish: tokio::sync::Mutex::new(()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn store(&self) -> Arc<EntryStore> {
        Arc::clone(&self.store)
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    /// Register an archive. Returns false if it was already registered.
    pub fn add_source(&self, url: impl Into<String>) -> bool {
        let url = url.into();
        let mut registry = self.registry();
        if registry.urls.contains(&url) {
            return false;
        }
        info!(url = %url, "Registered source");
        registry.urls.push(url);
        true
    }

    pub fn sources(&self) -> Vec<String> {
        self.registry().urls.clone()
    }

    pub fn is_loaded(&self, url: &str) -> bool {
        self.registry().loaded.contains(url)
    }

    /// Load every registered source that is neither loaded nor loading.
    ///
    /// The first source ever loaded goes straight into the store; later ones
    /// load into a staging store that is merged in with one sorted merge.
    /// A failing source does not stop the others; the first error is
    /// returned once every pending source has been tried.
    pub async fn load_if_necessary(
        &self,
        callbacks: &LoadCallbacks,
        cancel: &CancellationToken,
    ) -> IngestResult<LoadSummary> {
        let pending: Vec<String> = {
            let mut registry = self.registry();
            let pending: Vec<String> = registry
                .urls
                .iter()
                .filter(|u| !registry.loaded.contains(*u) && !registry.in_progress.contains(*u))
                .cloned()
                .collect();
            registry.in_progress.extend(pending.iter().cloned());
            pending
        };

        let mut summary = LoadSummary::default();
        let mut first_error: Option<IngestError> = None;
        let mut guards: Vec<InProgress<'_>> = pending
            .into_iter()
            .map(|url| InProgress {
                registry: &self.registry,
                url,
                succeeded: false,
            })
            .collect();

        for guard in guards.iter_mut() {
            if cancel.is_cancelled() {
                return Err(IngestError::Cancelled);
            }

            let direct = self.claim_direct();
            let result = if direct {
                let _publishing = self.publish.lock().await;
                let before = self.store.snapshot();
                let result = self.load_source(&guard.url, &self.store, callbacks, cancel).await;
                if result.is_err() {
                    // Drop whatever the failed attempt published
                    self.store.replace(before.to_vec());
                }
                self.registry().direct_claimed = result.is_ok();
                result
            } else {
                let staging = EntryStore::new();
                match self.load_source(&guard.url, &staging, callbacks, cancel).await {
                    Ok(_) => {
                        let _publishing = self.publish.lock().await;
                        let entries = staging.take();
                        let count = entries.len();
                        self.store.merge_in(entries);
                        callbacks.report_chunk_loaded(count);
                        Ok(count)
                    }
                    Err(e) => Err(e),
                }
            };

            match result {
                Ok(count) => {
                    guard.succeeded = true;
                    summary.sources_loaded += 1;
                    summary.entries += count;
                    info!(url = %guard.url, entries = count, direct, "Source loaded");
                }
                Err(IngestError::Cancelled) => return Err(IngestError::Cancelled),
                Err(e) => {
                    warn!(url = %guard.url, error = %e, "Source failed to load");
                    first_error.get_or_insert(e);
                }
            }
        }
        drop(guards);

        match first_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }

    /// Claim the main store for a direct load. Only the first load into an
    /// empty store gets it; everything else goes through staging.
    fn claim_direct(&self) -> bool {
        let mut registry = self.registry();
        let direct =
            !registry.direct_claimed && registry.loaded.is_empty() && self.store.is_empty();
        if direct {
            registry.direct_claimed = true;
        }
        direct
    }

    /// Load one archive into `target`, fast path first. Returns the number
    /// of entries `target` holds from this source.
    async fn load_source(
        &self,
        url: &str,
        target: &EntryStore,
        callbacks: &LoadCallbacks,
        cancel: &CancellationToken,
    ) -> IngestResult<usize> {
        let source = self.opener.open(url).await?;
        let archive = match source.archive_range().await {
            Ok(Some(range)) => Some(range),
            Ok(None) => {
                info!(url, "Archive is empty");
                return Ok(0);
            }
            Err(e) if self.options.allow_fallback => {
                warn!(url, error = %e, "Archive range unavailable");
                None
            }
            Err(e) => return Err(e.into()),
        };
        if let Some(range) = archive {
            callbacks.report_range(range);
        }

        let fast_allowed = !self.options.force_slow_path && source.supports_bulk_streaming();
        if let (true, Some(range)) = (fast_allowed, archive) {
            let before = target.snapshot();
            match fast::load(Arc::clone(&source), target, range, &self.options, callbacks, cancel)
                .await
            {
                Ok(_) => return Ok(target.len() - before.len()),
                Err(IngestError::Cancelled) => return Err(IngestError::Cancelled),
                Err(e) if self.options.allow_fallback => {
                    warn!(url, error = %e, "Chunked load failed; falling back to predicate queries");
                    // The slow path starts over from what was there before
                    target.replace(before.to_vec());
                }
                Err(e) => return Err(e),
            }
        }

        self.load_slow(source, target, archive, callbacks, cancel).await
    }

    async fn load_slow(
        &self,
        source: Arc<dyn LogSource>,
        target: &EntryStore,
        archive: Option<DateRange>,
        callbacks: &LoadCallbacks,
        cancel: &CancellationToken,
    ) -> IngestResult<usize> {
        let end = archive.map(|r| r.end).unwrap_or_else(Utc::now);
        let span = archive.map(|r| r.duration());
        slow::load(source, target, end, span, &self.options, callbacks, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::is_sorted_by_date;
    use crate::source::{
        MemorySource, QueryPosition, RawRecord, RecordPredicate, RecordStream, SourceError,
        SourceResult,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    /// Opens prebuilt sources by name; every open returns the same source
    #[derive(Default)]
    struct FixtureOpener {
        sources: HashMap<String, Arc<dyn LogSource>>,
    }

    impl FixtureOpener {
        fn with(mut self, url: &str, source: impl LogSource + 'static) -> Self {
            self.sources.insert(url.to_string(), Arc::new(source));
            self
        }
    }

    #[async_trait]
    impl SourceOpener for FixtureOpener {
        async fn open(&self, url: &str) -> SourceResult<Arc<dyn LogSource>> {
            self.sources
                .get(url)
                .cloned()
                .ok_or_else(|| SourceError::Unavailable(url.to_string()))
        }
    }

    /// Streams only the newest chunk on the first attempt; later attempts
    /// stream everything
    struct FlakySource {
        inner: MemorySource,
        attempts: AtomicUsize,
    }

    impl FlakySource {
        fn new(inner: MemorySource) -> Self {
            Self {
                inner,
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LogSource for FlakySource {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn archive_range(&self) -> SourceResult<Option<DateRange>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.inner.archive_range().await
        }

        async fn stream(&self, range: DateRange) -> SourceResult<RecordStream> {
            let archive = self.inner.archive_range().await?;
            let newest = archive.map(|a| a.end == range.end).unwrap_or(false);
            if self.attempts.load(Ordering::SeqCst) == 1 && !newest {
                // Let the newest chunk publish first
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                return Err(SourceError::Stream("flaky".to_string()));
            }
            self.inner.stream(range).await
        }

        async fn query(
            &self,
            predicate: &RecordPredicate,
            position: QueryPosition,
        ) -> SourceResult<Vec<RawRecord>> {
            self.inner.query(predicate, position).await
        }
    }

    /// Blocks in `archive_range` until released
    struct GatedSource {
        inner: MemorySource,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl GatedSource {
        fn new(inner: MemorySource) -> (Self, Arc<Notify>, Arc<Notify>) {
            let entered = Arc::new(Notify::new());
            let release = Arc::new(Notify::new());
            let source = Self {
                inner,
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            };
            (source, entered, release)
        }
    }

    #[async_trait]
    impl LogSource for GatedSource {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn archive_range(&self) -> SourceResult<Option<DateRange>> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.archive_range().await
        }

        fn supports_bulk_streaming(&self) -> bool {
            self.inner.supports_bulk_streaming()
        }

        async fn stream(&self, range: DateRange) -> SourceResult<RecordStream> {
            self.inner.stream(range).await
        }

        async fn query(
            &self,
            predicate: &RecordPredicate,
            position: QueryPosition,
        ) -> SourceResult<Vec<RawRecord>> {
            self.inner.query(predicate, position).await
        }
    }

    fn assert_no_duplicates(store: &EntryStore) {
        let snapshot = store.snapshot();
        let dates: HashSet<DateTime<Utc>> = snapshot.iter().map(|e| e.date).collect();
        assert_eq!(dates.len(), snapshot.len());
        assert!(is_sorted_by_date(&snapshot));
    }

    fn records(offset: i64, count: i64) -> Vec<RawRecord> {
        (0..count)
            .map(|i| RawRecord::log(at(offset + i * 10), format!("{}", offset + i * 10)))
            .collect()
    }

    #[tokio::test]
    async fn test_load_multiple_sources_merges_sorted() {
        let opener = FixtureOpener::default()
            .with("a", MemorySource::new("a", records(0, 50)))
            .with("b", MemorySource::new("b", records(5, 50)));
        let db = Database::new(Arc::new(opener));
        assert!(db.add_source("a"));
        assert!(db.add_source("b"));
        assert!(!db.add_source("a"));

        let summary = db
            .load_if_necessary(&LoadCallbacks::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.sources_loaded, 2);
        assert_eq!(summary.entries, 100);

        let snapshot = db.store().snapshot();
        assert_eq!(snapshot.len(), 100);
        assert!(is_sorted_by_date(&snapshot));
        assert!(db.is_loaded("a") && db.is_loaded("b"));

        // Nothing left to do
        let again = db
            .load_if_necessary(&LoadCallbacks::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(again, LoadSummary::default());
    }

    #[tokio::test]
    async fn test_fast_failure_falls_back() {
        let opener = FixtureOpener::default()
            .with("a", MemorySource::new("a", records(0, 40)).with_failing_streams());
        let db = Database::new(Arc::new(opener));
        db.add_source("a");

        let ranges = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&ranges);
        let callbacks = LoadCallbacks::new().on_range(move |_| *sink.lock().unwrap() += 1);
        db.load_if_necessary(&callbacks, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(db.store().len(), 40);
        assert!(is_sorted_by_date(&db.store().snapshot()));
        assert_eq!(*ranges.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_without_fallback_error_surfaces() {
        let opener = FixtureOpener::default()
            .with("a", MemorySource::new("a", records(0, 40)).with_failing_streams());
        let options = IngestOptions {
            allow_fallback: false,
            ..IngestOptions::default()
        };
        let db = Database::with_options(Arc::new(opener), options);
        db.add_source("a");

        let result = db
            .load_if_necessary(&LoadCallbacks::new(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(IngestError::Source(_))));
        assert!(!db.is_loaded("a"));
    }

    #[tokio::test]
    async fn test_failed_source_does_not_block_others() {
        let opener = FixtureOpener::default().with("good", MemorySource::new("good", records(0, 10)));
        let db = Database::new(Arc::new(opener));
        db.add_source("missing");
        db.add_source("good");

        let result = db
            .load_if_necessary(&LoadCallbacks::new(), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(IngestError::Source(SourceError::Unavailable(_)))
        ));
        assert!(db.is_loaded("good"));
        assert!(!db.is_loaded("missing"));
        assert_eq!(db.store().len(), 10);
    }

    #[tokio::test]
    async fn test_forced_slow_path() {
        let opener = FixtureOpener::default()
            .with("a", MemorySource::new("a", records(0, 30)).without_bulk_streaming());
        let db = Database::new(Arc::new(opener));
        db.add_source("a");
        db.load_if_necessary(&LoadCallbacks::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(db.store().len(), 30);
    }

    #[tokio::test]
    async fn test_cancelled_load_leaves_source_pending() {
        let opener = FixtureOpener::default().with("a", MemorySource::new("a", records(0, 10)));
        let db = Database::new(Arc::new(opener));
        db.add_source("a");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = db.load_if_necessary(&LoadCallbacks::new(), &cancel).await;
        assert!(matches!(result, Err(IngestError::Cancelled)));
        assert!(!db.is_loaded("a"));
        assert!(db.registry().in_progress.is_empty());
    }

    fn no_fallback() -> IngestOptions {
        IngestOptions {
            allow_fallback: false,
            chunk_count: 8,
            ..IngestOptions::default()
        }
    }

    #[tokio::test]
    async fn test_failed_direct_load_restores_store_and_retries_cleanly() {
        let opener = FixtureOpener::default()
            .with("a", FlakySource::new(MemorySource::new("a", records(0, 100))));
        let db = Database::with_options(Arc::new(opener), no_fallback());
        db.add_source("a");

        let published = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&published);
        let callbacks = LoadCallbacks::new().on_chunk_loaded(move |n| *sink.lock().unwrap() += n);
        let first = db.load_if_necessary(&callbacks, &CancellationToken::new()).await;
        assert!(matches!(first, Err(IngestError::Source(SourceError::Stream(_)))));
        assert!(*published.lock().unwrap() > 0);
        assert!(db.store().is_empty());
        assert!(!db.is_loaded("a"));

        let retry = db
            .load_if_necessary(&LoadCallbacks::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(retry.entries, 100);
        assert_eq!(db.store().len(), 100);
        assert_no_duplicates(&db.store());
        assert!(db.is_loaded("a"));
    }

    #[tokio::test]
    async fn test_partial_fast_load_then_fallback_has_no_duplicates() {
        let opener = FixtureOpener::default()
            .with("a", FlakySource::new(MemorySource::new("a", records(0, 100))));
        let options = IngestOptions {
            chunk_count: 8,
            ..IngestOptions::default()
        };
        let db = Database::with_options(Arc::new(opener), options);
        db.add_source("a");

        let summary = db
            .load_if_necessary(&LoadCallbacks::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.entries, 100);
        assert_eq!(db.store().len(), 100);
        assert_no_duplicates(&db.store());
    }

    #[tokio::test]
    async fn test_overlapping_loads_keep_both_sources() {
        let (a, a_entered, a_release) = GatedSource::new(MemorySource::new("a", records(1000, 100)));
        let (b, b_entered, b_release) =
            GatedSource::new(MemorySource::new("b", records(0, 100)).without_bulk_streaming());
        let opener = FixtureOpener::default().with("a", a).with("b", b);
        let db = Database::new(Arc::new(opener));
        let callbacks = LoadCallbacks::new();
        let cancel = CancellationToken::new();
        db.add_source("a");

        let (first, second) = tokio::join!(db.load_if_necessary(&callbacks, &cancel), async {
            // Start the second load only once the first one owns the store
            a_entered.notified().await;
            db.add_source("b");
            let (second, _) = tokio::join!(db.load_if_necessary(&callbacks, &cancel), async {
                b_entered.notified().await;
                a_release.notify_one();
                b_release.notify_one();
            });
            second
        });

        assert_eq!(first.unwrap().entries, 100);
        assert_eq!(second.unwrap().entries, 100);
        assert!(db.is_loaded("a") && db.is_loaded("b"));
        assert_eq!(db.store().len(), 200);
        assert_no_duplicates(&db.store());
    }
}
