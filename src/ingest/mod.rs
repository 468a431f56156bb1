//! Ingestion Pipeline
//!
//! Loads archives into the sorted [`EntryStore`]:
//!
//! - **Fast path**: the archive span is split into power-weighted chunks
//!   that are streamed concurrently and published newest first
//! - **Slow path**: predicate queries over widening windows, used when bulk
//!   streaming is unavailable or fails
//!
//! [`Database`] tracks registered sources and which ones still need loading.

mod chunks;
mod database;
mod error;
mod fast;
mod progress;
mod slow;
mod store;

pub use chunks::{partition, Chunk};
pub use database::{Database, LoadSummary};
pub use error::{IngestError, IngestResult};
pub use progress::{LoadCallbacks, LookbackWindow, WindowProgress};
pub use store::EntryStore;

use chrono::Duration;

/// Tuning for archive loads
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Number of fast-path chunks
    pub chunk_count: usize,
    /// Chunk weighting exponent; above 1 makes recent chunks narrower
    pub chunk_power: f64,
    pub min_workers: usize,
    pub max_workers: usize,
    /// Fall back to predicate queries when the fast path fails
    pub allow_fallback: bool,
    /// Skip the fast path entirely
    pub force_slow_path: bool,
    /// Slow-path windows before the final "everything" window
    pub slow_windows: Vec<Duration>,
    /// Subsystems given their own partition in the final slow-path window
    pub high_volume_subsystems: Vec<String>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunk_count: 64,
            chunk_power: 2.0,
            min_workers: 4,
            max_workers: 8,
            allow_fallback: true,
            force_slow_path: false,
            slow_windows: vec![Duration::minutes(5), Duration::minutes(30)],
            high_volume_subsystems: default_high_volume_subsystems(),
        }
    }
}

/// Subsystems that usually dominate a system archive
pub fn default_high_volume_subsystems() -> Vec<String> {
    [
        "com.apple.network",
        "com.apple.CFNetwork",
        "com.apple.runningboard",
        "com.apple.xpc",
        "com.apple.launchservices",
        "com.apple.bluetooth",
        "com.apple.coreanalytics",
        "com.apple.defaults",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl IngestOptions {
    /// Core count clamped to `[min_workers, max_workers]`
    pub fn worker_count(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let min = self.min_workers.max(1);
        let max = self.max_workers.max(min);
        cores.clamp(min, max)
    }
}
