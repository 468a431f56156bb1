//! Power-weighted chunking of an archive's time span
//!
//! Chunk `i` of `N` covers the offsets from the archive end between
//! `span * (i/N)^p` and `span * ((i+1)/N)^p`:
//!
//! ```text
//!   start                                                   end
//!     |---------- 3 ----------|------ 2 ------|--- 1 ---|-0-|
//! ```
//!
//! With `p > 1` the newest chunks are the narrowest, so recent entries are
//! published first and quickly.

use crate::model::DateRange;
use chrono::{DateTime, Duration, Utc};

/// One unit of fast-path work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// 0 is the newest chunk
    pub index: usize,
    pub range: DateRange,
}

impl Chunk {
    /// The chunk's newest edge
    pub fn newest_edge(&self) -> DateTime<Utc> {
        self.range.end
    }
}

/// Offset from the archive end for fraction `f` of the span
fn offset(span: Duration, fraction: f64) -> Duration {
    match span.num_nanoseconds() {
        Some(nanos) => Duration::nanoseconds((nanos as f64 * fraction).round() as i64),
        None => Duration::milliseconds((span.num_milliseconds() as f64 * fraction).round() as i64),
    }
}

/// Split `range` into at most `count` contiguous, non-overlapping chunks,
/// newest first. Chunks that would be empty are dropped and the remaining
/// ones renumbered, so indices stay contiguous.
pub fn partition(range: DateRange, count: usize, power: f64) -> Vec<Chunk> {
    if range.is_empty() {
        return Vec::new();
    }
    let count = count.max(1);
    let power = if power.is_finite() && power > 0.0 {
        power
    } else {
        1.0
    };
    let span = range.duration();

    // boundaries[k] is the newest edge of chunk k; boundaries[count] is the start
    let mut boundaries = Vec::with_capacity(count + 1);
    boundaries.push(range.end);
    for k in 1..count {
        let fraction = (k as f64 / count as f64).powf(power);
        let edge = range.end - offset(span, fraction);
        boundaries.push(edge.max(range.start).min(range.end));
    }
    boundaries.push(range.start);

    boundaries
        .windows(2)
        .filter_map(|pair| DateRange::try_new(pair[1], pair[0]))
        .filter(|r| !r.is_empty())
        .enumerate()
        .map(|(index, range)| Chunk { index, range })
        .collect()
}
