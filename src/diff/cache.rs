//! Memoization of snapshot diffs.
//!
//! Snapshots are immutable, so a diff between two tree ids never changes
//! and cached results are never invalidated. A cached diff also answers the
//! reverse question by inverting each entry.

use std::collections::HashMap;
use std::sync::Arc;

use git2::Repository;
use parking_lot::Mutex;

use crate::diff::engine::{diff_trees, DiffEntry};
use crate::storage::{StorageResult, TreeId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DiffKey {
    old: TreeId,
    new: TreeId,
    filter: Option<String>,
}

/// Shared cache of computed diffs keyed by (old, new, filter).
#[derive(Default)]
pub struct DiffCache {
    entries: Mutex<HashMap<DiffKey, Arc<Vec<DiffEntry>>>>,
}

impl DiffCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// diff two snapshots, reusing an earlier result when possible
    pub fn diff(&self, repo: &Repository, old: TreeId, new: TreeId, filter: Option<&str>) -> StorageResult<Arc<Vec<DiffEntry>>> {
        let key = DiffKey {
            old,
            new,
            filter: filter.map(str::to_string),
        };
        if let Some(hit) = self.lookup(&key) {
            return Ok(hit);
        }

        let computed = Arc::new(diff_trees(repo, old, new, filter)?);
        self.entries.lock().insert(key, Arc::clone(&computed));
        Ok(computed)
    }

    fn lookup(&self, key: &DiffKey) -> Option<Arc<Vec<DiffEntry>>> {
        let mut entries = self.entries.lock();
        if let Some(hit) = entries.get(key) {
            tracing::trace!(old = %key.old, new = %key.new, "diff cache hit");
            return Some(Arc::clone(hit));
        }

        let reverse = DiffKey {
            old: key.new,
            new: key.old,
            filter: key.filter.clone(),
        };
        let inverted: Vec<DiffEntry> = entries.get(&reverse)?.iter().map(DiffEntry::inverse).collect();
        tracing::trace!(old = %key.old, new = %key.new, "diff cache hit (reversed)");
        let inverted = Arc::new(inverted);
        entries.insert(key.clone(), Arc::clone(&inverted));
        Some(inverted)
    }

    /// number of cached diffs
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{put_feature, ChangeType, Feature, NodePath, TreeMutator};
    use tempfile::TempDir;

    #[test]
    fn test_cache_hits_and_reverse() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();

        let empty = TreeMutator::empty(&repo).write().unwrap();
        let id = put_feature(&repo, &Feature::new().with("name", "a")).unwrap();
        let mut mutator = TreeMutator::empty(&repo);
        mutator.put_feature(&NodePath::new("parks/1").unwrap(), id);
        let full = mutator.write().unwrap();

        let cache = DiffCache::new();
        let forward = cache.diff(&repo, empty, full, None).unwrap();
        assert_eq!(forward[0].change, ChangeType::Added);
        assert_eq!(cache.len(), 1);

        let again = cache.diff(&repo, empty, full, None).unwrap();
        assert!(Arc::ptr_eq(&forward, &again));

        let backward = cache.diff(&repo, full, empty, None).unwrap();
        assert_eq!(backward[0].change, ChangeType::Removed);
        assert_eq!(cache.len(), 2);

        // filters are part of the key
        cache.diff(&repo, empty, full, Some("parks")).unwrap();
        assert_eq!(cache.len(), 3);
    }
}
