//! Entry statistics
//!
//! Counts per level, process and subsystem over an entry list, computed in
//! parallel batches and reduced.

use crate::model::{DateRange, EntryType, LogLevel, SharedEntry};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Aggregate counts over a list of entries
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EntryStats {
    pub total: usize,
    pub logs: usize,
    pub activities: usize,
    pub by_level: BTreeMap<LogLevel, usize>,
    pub processes: HashMap<String, usize>,
    pub subsystems: HashMap<String, usize>,
    pub span: Option<DateRange>,
}

impl EntryStats {
    /// Compute over `entries` split into `batches` parallel batches
    pub fn compute(entries: &[SharedEntry], batches: usize) -> Self {
        if entries.is_empty() {
            return Self::default();
        }
        let batch_size = entries.len().div_ceil(batches.max(1));

        entries
            .par_chunks(batch_size)
            .map(Self::compute_batch)
            .reduce(Self::default, Self::merge)
    }

    fn compute_batch(batch: &[SharedEntry]) -> Self {
        let mut stats = Self::default();
        for entry in batch {
            stats.total += 1;
            match entry.entry_type {
                EntryType::Log => stats.logs += 1,
                EntryType::Activity => stats.activities += 1,
            }
            if let Some(level) = entry.level {
                *stats.by_level.entry(level).or_insert(0) += 1;
            }
            if !entry.process.is_empty() {
                *stats.processes.entry(entry.process.clone()).or_insert(0) += 1;
            }
            if let Some(subsystem) = &entry.subsystem {
                *stats.subsystems.entry(subsystem.clone()).or_insert(0) += 1;
            }
            let point = DateRange::covering(entry.date, entry.date);
            stats.span = Some(match stats.span {
                Some(span) => span.union(&point),
                None => point,
            });
        }
        stats
    }

    fn merge(mut self, other: Self) -> Self {
        self.total += other.total;
        self.logs += other.logs;
        self.activities += other.activities;
        for (level, count) in other.by_level {
            *self.by_level.entry(level).or_insert(0) += count;
        }
        for (process, count) in other.processes {
            *self.processes.entry(process).or_insert(0) += count;
        }
        for (subsystem, count) in other.subsystems {
            *self.subsystems.entry(subsystem).or_insert(0) += count;
        }
        self.span = match (self.span, other.span) {
            (Some(a), Some(b)) => Some(a.union(&b)),
            (a, b) => a.or(b),
        };
        self
    }

    pub fn level_count(&self, level: LogLevel) -> usize {
        self.by_level.get(&level).copied().unwrap_or(0)
    }

    /// Most frequent processes, ties broken by name
    pub fn top_processes(&self, n: usize) -> Vec<(&str, usize)> {
        top(&self.processes, n)
    }

    /// Most frequent subsystems, ties broken by name
    pub fn top_subsystems(&self, n: usize) -> Vec<(&str, usize)> {
        top(&self.subsystems, n)
    }
}

fn top(counts: &HashMap<String, usize>, n: usize) -> Vec<(&str, usize)> {
    let mut ranked: Vec<(&str, usize)> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(n);
    ranked
}
