//! Lookback windows, per-window progress and load callbacks

use crate::ingest::chunks::Chunk;
use crate::model::DateRange;
use chrono::Duration;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// A caller-chosen window reaching back from the archive end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookbackWindow {
    pub name: String,
    /// `None` is the whole archive
    pub interval: Option<Duration>,
}

impl LookbackWindow {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval: Some(interval),
        }
    }

    pub fn all(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interval: None,
        }
    }

    /// "Last 5 Minutes", "Last Hour", "All"
    pub fn defaults() -> Vec<LookbackWindow> {
        vec![
            LookbackWindow::new("Last 5 Minutes", Duration::minutes(5)),
            LookbackWindow::new("Last Hour", Duration::hours(1)),
            LookbackWindow::all("All"),
        ]
    }

    /// The part of `archive` this window covers
    pub fn within(&self, archive: DateRange) -> DateRange {
        match self.interval {
            Some(interval) if interval < archive.duration() => {
                DateRange::ending_at(archive.end, interval)
            }
            _ => archive,
        }
    }

    /// Whether a chunk counts towards this window
    pub fn includes(&self, chunk: &Chunk, archive: DateRange) -> bool {
        let window = self.within(archive);
        chunk.newest_edge() > window.start
    }

    /// Whether loading `loaded` (reaching back from the archive end) fully
    /// covers this window
    pub fn is_covered_by(&self, loaded: Option<Duration>) -> bool {
        match (self.interval, loaded) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(interval), Some(loaded)) => loaded >= interval,
        }
    }
}

/// Progress of one lookback window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowProgress {
    pub name: String,
    pub completed: usize,
    pub total: usize,
}

impl WindowProgress {
    /// Completed share in `0.0..=1.0`; a window with no work is complete
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

impl fmt::Display for WindowProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.0}%", self.name, self.fraction() * 100.0)
    }
}

/// Per-window chunk accounting for one fast-path load
#[derive(Debug)]
pub(crate) struct ChunkProgress {
    names: Vec<String>,
    /// Per window, per chunk index: whether the chunk counts for the window
    membership: Vec<Vec<bool>>,
    finished: Vec<bool>,
}

impl ChunkProgress {
    pub(crate) fn new(windows: &[LookbackWindow], chunks: &[Chunk], archive: DateRange) -> Self {
        Self {
            names: windows.iter().map(|w| w.name.clone()).collect(),
            membership: windows
                .iter()
                .map(|w| chunks.iter().map(|c| w.includes(c, archive)).collect())
                .collect(),
            finished: vec![false; chunks.len()],
        }
    }

    pub(crate) fn finish(&mut self, index: usize) {
        if let Some(slot) = self.finished.get_mut(index) {
            *slot = true;
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<WindowProgress> {
        self.names
            .iter()
            .zip(&self.membership)
            .map(|(name, members)| WindowProgress {
                name: name.clone(),
                completed: members
                    .iter()
                    .zip(&self.finished)
                    .filter(|(member, done)| **member && **done)
                    .count(),
                total: members.iter().filter(|m| **m).count(),
            })
            .collect()
    }
}

type ProgressFn = dyn Fn(&[WindowProgress]) + Send + Sync;
type RangeFn = dyn Fn(DateRange) + Send + Sync;
type ChunkLoadedFn = dyn Fn(usize) + Send + Sync;

/// Callbacks a load reports through. Every callback is optional and is
/// never called while a lock is held.
#[derive(Clone, Default)]
pub struct LoadCallbacks {
    windows: Vec<LookbackWindow>,
    progress: Option<Arc<ProgressFn>>,
    range: Option<Arc<RangeFn>>,
    chunk_loaded: Option<Arc<ChunkLoadedFn>>,
}

impl fmt::Debug for LoadCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCallbacks")
            .field("windows", &self.windows)
            .field("progress", &self.progress.is_some())
            .field("range", &self.range.is_some())
            .field("chunk_loaded", &self.chunk_loaded.is_some())
            .finish()
    }
}

impl LoadCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Windows to report progress for
    pub fn with_windows(mut self, windows: Vec<LookbackWindow>) -> Self {
        self.windows = windows;
        self
    }

    pub fn on_progress(mut self, f: impl Fn(&[WindowProgress]) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(f));
        self
    }

    /// Called once with the archive range before loading starts
    pub fn on_range(mut self, f: impl Fn(DateRange) + Send + Sync + 'static) -> Self {
        self.range = Some(Arc::new(f));
        self
    }

    /// Called after each publication with the number of entries published
    pub fn on_chunk_loaded(mut self, f: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.chunk_loaded = Some(Arc::new(f));
        self
    }

    pub fn windows(&self) -> &[LookbackWindow] {
        &self.windows
    }

    pub(crate) fn report_progress(&self, progress: &[WindowProgress]) {
        if let Some(f) = &self.progress {
            f(progress);
        }
    }

    pub(crate) fn report_range(&self, range: DateRange) {
        if let Some(f) = &self.range {
            f(range);
        }
    }

    pub(crate) fn report_chunk_loaded(&self, published: usize) {
        if let Some(f) = &self.chunk_loaded {
            f(published);
        }
    }
}
