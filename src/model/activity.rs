//! Activity tree reconstruction
//!
//! Activities reference their parent by id only. The tree is rebuilt as owned
//! values in two passes:
//!
//! ```text
//! forward:  entries (arrival order) → id → node map, child id lists, roots
//! backward: ids (reverse discovery) → materialize children before parents
//! ```
//!
//! A child is attached only to a parent discovered before it, so walking the
//! discovery order backwards always finds every child already built.

use crate::model::entry::{Entry, EntryType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A node of the reconstructed activity tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub name: String,
    pub process: String,
    pub date: DateTime<Utc>,
    /// `None` exactly when `subactivity_ids` is empty
    pub subactivities: Option<Vec<Activity>>,
    pub subactivity_ids: Vec<u64>,
}

impl Activity {
    fn from_entry(entry: &Entry) -> Self {
        Self {
            id: entry.activity_id,
            parent_id: entry.parent_activity_id,
            name: entry.message.clone(),
            process: entry.process.clone(),
            date: entry.date,
            subactivities: None,
            subactivity_ids: Vec::new(),
        }
    }

    /// Children, or an empty slice for leaves
    pub fn children(&self) -> &[Activity] {
        self.subactivities.as_deref().unwrap_or(&[])
    }

    /// Visit this activity and all descendants, pre-order
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Activity)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    /// Ids of this activity and all its descendants
    pub fn descendant_ids(&self) -> Vec<u64> {
        let mut ids = Vec::new();
        self.walk(&mut |activity| ids.push(activity.id));
        ids
    }

    /// Number of activities in this subtree, including self
    pub fn subtree_len(&self) -> usize {
        1 + self.children().iter().map(Activity::subtree_len).sum::<usize>()
    }
}

/// Result of rebuilding the activity tree from a list of entries
#[derive(Debug, Clone, Default)]
pub struct ActivityTree {
    /// Top-level activities in discovery order
    pub roots: Vec<Activity>,
    /// Child ids per activity, for closure queries without walking the tree
    children: HashMap<u64, Vec<u64>>,
}

impl ActivityTree {
    /// Build the tree from entries in arrival order. Non-activity entries are
    /// ignored; a repeated activity id keeps its first occurrence.
    pub fn build<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a Entry>,
    {
        // Forward pass: flat map in discovery order
        let mut nodes: HashMap<u64, Activity> = HashMap::new();
        let mut order: Vec<u64> = Vec::new();
        let mut roots: Vec<u64> = Vec::new();

        for entry in entries {
            if entry.entry_type != EntryType::Activity || nodes.contains_key(&entry.activity_id) {
                continue;
            }

            let node = Activity::from_entry(entry);
            let id = node.id;
            match node.parent_id {
                Some(parent) if parent != id && nodes.contains_key(&parent) => {
                    if let Some(parent_node) = nodes.get_mut(&parent) {
                        parent_node.subactivity_ids.push(id);
                    }
                }
                _ => roots.push(id),
            }
            nodes.insert(id, node);
            order.push(id);
        }

        let children: HashMap<u64, Vec<u64>> = nodes
            .values()
            .filter(|node| !node.subactivity_ids.is_empty())
            .map(|node| (node.id, node.subactivity_ids.clone()))
            .collect();

        // Backward pass: children are always discovered after their parent,
        // so reverse discovery order builds every subtree bottom-up.
        let mut built: HashMap<u64, Activity> = HashMap::with_capacity(nodes.len());
        for id in order.iter().rev() {
            let Some(mut node) = nodes.remove(id) else {
                continue;
            };
            if !node.subactivity_ids.is_empty() {
                let subactivities = node
                    .subactivity_ids
                    .iter()
                    .filter_map(|child| built.remove(child))
                    .collect();
                node.subactivities = Some(subactivities);
            }
            built.insert(*id, node);
        }

        let roots = roots.iter().filter_map(|id| built.remove(id)).collect();

        Self { roots, children }
    }

    /// Ids of `selected` and all of their descendants
    pub fn closure(&self, selected: &HashSet<u64>) -> HashSet<u64> {
        let mut closure = HashSet::with_capacity(selected.len());
        let mut stack: Vec<u64> = selected.iter().copied().collect();
        while let Some(id) = stack.pop() {
            if !closure.insert(id) {
                continue;
            }
            if let Some(children) = self.children.get(&id) {
                stack.extend(children.iter().copied());
            }
        }
        closure
    }

    /// Total number of activities in the tree
    pub fn len(&self) -> usize {
        self.roots.iter().map(Activity::subtree_len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
