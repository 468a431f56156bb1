//! Slow path: predicate queries over widening windows
//!
//! Used when bulk streaming is unavailable or has failed. Windows are
//! resolved one after another (5 minutes, 30 minutes, everything) and each
//! one replaces the store only when it reaches further back than what is
//! already there, so the visible range only ever grows.
//!
//! The final window is split into disjoint predicates that run concurrently:
//!
//! ```text
//! log ∧ subsystem = s₁   ...   log ∧ subsystem = sₙ   log ∧ subsystem ∉ {s₁..sₙ}   activity
//! ```

use crate::ingest::error::{IngestError, IngestResult};
use crate::ingest::progress::{LoadCallbacks, WindowProgress};
use crate::ingest::store::EntryStore;
use crate::ingest::IngestOptions;
use crate::model::SharedEntry;
use crate::source::{
    LogSource, QueryPosition, RawRecord, RecordPredicate, EVENT_TYPE_ACTIVITY, EVENT_TYPE_LOG,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Disjoint predicates whose union is every log and activity record
pub(crate) fn partition_predicates(high_volume_subsystems: &[String]) -> Vec<RecordPredicate> {
    let log = || RecordPredicate::EventType(EVENT_TYPE_LOG);
    let mut predicates: Vec<RecordPredicate> = high_volume_subsystems
        .iter()
        .map(|s| RecordPredicate::And(vec![log(), RecordPredicate::SubsystemIn(vec![s.clone()])]))
        .collect();
    predicates.push(RecordPredicate::And(vec![
        log(),
        RecordPredicate::not(RecordPredicate::SubsystemIn(
            high_volume_subsystems.to_vec(),
        )),
    ]));
    predicates.push(RecordPredicate::EventType(EVENT_TYPE_ACTIVITY));
    predicates
}

fn to_entries(records: Vec<RawRecord>) -> Vec<SharedEntry> {
    let mut entries: Vec<SharedEntry> = records
        .iter()
        .filter_map(RawRecord::to_entry)
        .map(Arc::new)
        .collect();
    entries.sort_by_key(|e| e.date);
    entries
}

/// Run every partition concurrently; first error wins once all are done
async fn query_partitioned(
    source: &Arc<dyn LogSource>,
    predicates: Vec<RecordPredicate>,
) -> IngestResult<Vec<RawRecord>> {
    let mut tasks = JoinSet::new();
    for (index, predicate) in predicates.into_iter().enumerate() {
        let source = Arc::clone(source);
        tasks.spawn(async move {
            let records = source.query(&predicate, QueryPosition::Start).await;
            (index, records)
        });
    }

    let mut parts: Vec<(usize, Vec<RawRecord>)> = Vec::new();
    let mut first_error: Option<IngestError> = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(records))) => parts.push((index, records)),
            Ok((_, Err(e))) => {
                first_error.get_or_insert(IngestError::Source(e));
            }
            Err(e) => {
                first_error.get_or_insert(IngestError::from(e));
            }
        }
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    parts.sort_by_key(|(index, _)| *index);
    Ok(parts.into_iter().flat_map(|(_, records)| records).collect())
}

fn window_progress(callbacks: &LoadCallbacks, loaded: Option<Duration>) -> Vec<WindowProgress> {
    callbacks
        .windows()
        .iter()
        .map(|w| WindowProgress {
            name: w.name.clone(),
            completed: usize::from(w.is_covered_by(loaded)),
            total: 1,
        })
        .collect()
}

/// Load through predicate queries. `end` anchors the windows (the archive
/// end when known). Returns the number of entries in the store afterwards.
pub(crate) async fn load(
    source: Arc<dyn LogSource>,
    store: &EntryStore,
    end: DateTime<Utc>,
    span: Option<Duration>,
    options: &IngestOptions,
    callbacks: &LoadCallbacks,
    cancel: &CancellationToken,
) -> IngestResult<usize> {
    let started = Instant::now();
    info!(source = source.name(), "Starting predicate load");
    callbacks.report_progress(&window_progress(callbacks, Some(Duration::zero())));

    let mut windows: Vec<Option<Duration>> = options
        .slow_windows
        .iter()
        .copied()
        .filter(|w| span.map(|s| *w < s).unwrap_or(true))
        .map(Some)
        .collect();
    windows.push(None);

    for window in windows {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let records = match window {
            Some(interval) => source
                .query(&RecordPredicate::Always, QueryPosition::Date(end - interval))
                .await
                .map_err(IngestError::Source)?,
            None => {
                let predicates = partition_predicates(&options.high_volume_subsystems);
                query_partitioned(&source, predicates).await?
            }
        };

        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let entries = to_entries(records);
        let count = entries.len();
        if store.replace_if_earlier(entries) {
            debug!(
                window = ?window,
                entries = count,
                "Window replaced store"
            );
            callbacks.report_chunk_loaded(count);
        }
        callbacks.report_progress(&window_progress(callbacks, window));
    }

    info!(
        source = source.name(),
        entries = store.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Predicate load complete"
    );
    Ok(store.len())
}
