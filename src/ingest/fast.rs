//! Fast path: concurrent chunked streaming
//!
//! ```text
//! archive range → partition → workers (semaphore-bounded) → finished chunks
//!                                                                ↓
//!                     store.prepend ← contiguous run from next index
//! ```
//!
//! Chunk `k` is published only after chunks `0..k`, and every published run
//! is older than what the store already holds, so each publication is a
//! plain prepend.

use crate::ingest::chunks::{partition, Chunk};
use crate::ingest::error::{IngestError, IngestResult};
use crate::ingest::progress::{ChunkProgress, LoadCallbacks};
use crate::ingest::store::EntryStore;
use crate::ingest::IngestOptions;
use crate::model::{DateRange, SharedEntry};
use crate::source::{LogSource, SourceError};
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stream one chunk, convert and sort it. `None` when cancelled.
async fn load_chunk(
    source: Arc<dyn LogSource>,
    chunk: Chunk,
    cancel: CancellationToken,
) -> Result<Option<Vec<SharedEntry>>, SourceError> {
    let mut stream = source.stream(chunk.range).await?;
    let mut entries = Vec::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            next = stream.next() => match next {
                Some(record) => {
                    if let Some(entry) = record?.to_entry() {
                        entries.push(Arc::new(entry));
                    }
                }
                None => break,
            },
        }
    }

    entries.sort_by_key(|e: &SharedEntry| e.date);
    Ok(Some(entries))
}

/// Pulls every finished chunk that continues the published prefix
#[derive(Debug, Default)]
struct PublishQueue {
    next: usize,
    finished: BTreeMap<usize, Vec<SharedEntry>>,
}

impl PublishQueue {
    fn finish(&mut self, index: usize, entries: Vec<SharedEntry>) {
        self.finished.insert(index, entries);
    }

    /// The maximal contiguous run starting at the next unpublished index,
    /// concatenated older chunks first
    fn take_run(&mut self) -> Option<Vec<SharedEntry>> {
        let mut run = Vec::new();
        while let Some(entries) = self.finished.remove(&self.next) {
            run.push(entries);
            self.next += 1;
        }
        if run.is_empty() {
            return None;
        }
        Some(run.into_iter().rev().flatten().collect())
    }
}

/// Load `archive` from `source` into `store`. Returns the number of entries
/// published.
pub(crate) async fn load(
    source: Arc<dyn LogSource>,
    store: &EntryStore,
    archive: DateRange,
    options: &IngestOptions,
    callbacks: &LoadCallbacks,
    cancel: &CancellationToken,
) -> IngestResult<usize> {
    let chunks = partition(archive, options.chunk_count, options.chunk_power);
    let workers = options.worker_count();
    let started = Instant::now();
    info!(
        source = source.name(),
        chunks = chunks.len(),
        workers,
        "Starting chunked load"
    );

    let mut progress = ChunkProgress::new(callbacks.windows(), &chunks, archive);
    callbacks.report_progress(&progress.snapshot());

    // Stops the remaining workers on failure without touching the caller's token
    let workers_cancel = cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();
    for chunk in chunks.iter().copied() {
        let source = Arc::clone(&source);
        let semaphore = Arc::clone(&semaphore);
        let cancel = workers_cancel.clone();
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (chunk.index, Ok(None)),
            };
            if cancel.is_cancelled() {
                return (chunk.index, Ok(None));
            }
            (chunk.index, load_chunk(source, chunk, cancel).await)
        });
    }

    let mut queue = PublishQueue::default();
    let mut published = 0;
    let mut first_error: Option<IngestError> = None;

    while let Some(joined) = tasks.join_next().await {
        let (index, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                first_error.get_or_insert(IngestError::from(e));
                workers_cancel.cancel();
                continue;
            }
        };

        match result {
            Ok(Some(entries)) if first_error.is_none() => {
                debug!(chunk = index, entries = entries.len(), "Chunk finished");
                queue.finish(index, entries);
                progress.finish(index);
                callbacks.report_progress(&progress.snapshot());

                if let Some(run) = queue.take_run() {
                    let count = run.len();
                    store.prepend(run);
                    published += count;
                    callbacks.report_chunk_loaded(count);
                }
            }
            Ok(_) => {}
            Err(e) => {
                if first_error.is_none() {
                    warn!(chunk = index, error = %e, "Chunk failed");
                    first_error = Some(IngestError::Source(e));
                }
                workers_cancel.cancel();
            }
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }

    info!(
        source = source.name(),
        entries = published,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Chunked load complete"
    );
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::is_sorted_by_date;
    use crate::source::{MemorySource, RawRecord};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn source(count: i64) -> MemorySource {
        // Source order is deliberately not date order
        let records = (0..count)
            .rev()
            .map(|i| RawRecord::log(Utc.timestamp_opt(i * 60, 0).unwrap(), format!("entry {}", i)))
            .collect();
        MemorySource::new("test", records)
    }

    fn options(chunks: usize) -> IngestOptions {
        IngestOptions {
            chunk_count: chunks,
            ..IngestOptions::default()
        }
    }

    #[test]
    fn test_publish_queue_waits_for_prefix() {
        let entry = |t: i64| Arc::new(crate::model::Entry::log(Utc.timestamp_opt(t, 0).unwrap(), ""));
        let mut queue = PublishQueue::default();
        queue.finish(1, vec![entry(10)]);
        assert!(queue.take_run().is_none());

        queue.finish(0, vec![entry(20)]);
        queue.finish(3, vec![entry(0)]);
        let run = queue.take_run().unwrap();
        let dates: Vec<i64> = run.iter().map(|e| e.date.timestamp()).collect();
        assert_eq!(dates, vec![10, 20]);
        assert!(queue.take_run().is_none());

        queue.finish(2, vec![entry(5)]);
        let run = queue.take_run().unwrap();
        let dates: Vec<i64> = run.iter().map(|e| e.date.timestamp()).collect();
        assert_eq!(dates, vec![0, 5]);
    }

    #[tokio::test]
    async fn test_load_sorts_everything() {
        let source = Arc::new(source(500));
        let archive = source.archive_range().await.unwrap().unwrap();
        let store = EntryStore::new();
        let published = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&published);
        let callbacks = LoadCallbacks::new().on_chunk_loaded(move |n| *sink.lock().unwrap() += n);

        let count = load(
            source,
            &store,
            archive,
            &options(16),
            &callbacks,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(count, 500);
        assert_eq!(*published.lock().unwrap(), 500);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 500);
        assert!(is_sorted_by_date(&snapshot));
    }

    #[tokio::test]
    async fn test_progress_reaches_completion() {
        let source = Arc::new(source(120));
        let archive = source.archive_range().await.unwrap().unwrap();
        let last = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&last);
        let callbacks = LoadCallbacks::new()
            .with_windows(crate::ingest::LookbackWindow::defaults())
            .on_progress(move |p| *sink.lock().unwrap() = p.to_vec());

        load(
            source,
            &EntryStore::new(),
            archive,
            &options(8),
            &callbacks,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let last = last.lock().unwrap();
        assert_eq!(last.len(), 3);
        assert!(last.iter().all(|p| p.is_complete()));
    }

    #[tokio::test]
    async fn test_stream_failure_surfaces() {
        let source = Arc::new(source(100).with_failing_streams());
        let archive = source.archive_range().await.unwrap().unwrap();
        let result = load(
            source,
            &EntryStore::new(),
            archive,
            &options(4),
            &LoadCallbacks::new(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(IngestError::Source(SourceError::Stream(_)))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let source = Arc::new(source(100));
        let archive = source.archive_range().await.unwrap().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let store = EntryStore::new();
        let result = load(source, &store, archive, &options(4), &LoadCallbacks::new(), &cancel).await;
        assert!(matches!(result, Err(IngestError::Cancelled)));
        assert!(store.is_empty());
    }
}
