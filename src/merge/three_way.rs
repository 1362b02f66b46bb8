//! Path-level three-way merge of snapshots.
//!
//! Given a common ancestor and two descendants, every feature path changed
//! on only one side takes that side's version; paths changed identically on
//! both sides are kept; anything else is a conflict. The merged snapshot
//! starts from "ours", so conflicting paths hold our version until they are
//! resolved.

use std::collections::{BTreeSet, HashMap};

use git2::Repository;

use crate::diff::{DiffCache, DiffEntry};
use crate::storage::{
    CommitId, ConflictEntry, FeatureId, FeatureVersion, NodePath, StorageError, StorageResult, TreeHandle,
    TreeId, TreeMutator,
};

/// One path both sides changed in different ways.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictPath {
    pub path: String,
    pub ancestor: Option<FeatureId>,
    pub ours: Option<FeatureId>,
    pub theirs: Option<FeatureId>,
}

impl ConflictPath {
    /// attach the commits each version was read from
    pub fn into_entry(self, ancestor: Option<CommitId>, ours: Option<CommitId>, theirs: Option<CommitId>) -> ConflictEntry {
        ConflictEntry {
            path: self.path,
            ancestor: FeatureVersion {
                commit: ancestor,
                feature: self.ancestor,
            },
            ours: FeatureVersion {
                commit: ours,
                feature: self.ours,
            },
            theirs: FeatureVersion {
                commit: theirs,
                feature: self.theirs,
            },
        }
    }
}

/// Result of merging three snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMerge {
    /// ours plus every non-conflicting change from theirs
    pub tree: TreeId,
    pub conflicts: Vec<ConflictPath>,
    /// number of changes taken from theirs
    pub applied: usize,
}

impl TreeMerge {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

fn node_path(path: &str) -> StorageResult<NodePath> {
    NodePath::new(path).map_err(|e| StorageError::CorruptedData {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// merge `theirs` into `ours` relative to `base`
pub fn merge_trees(repo: &Repository, cache: &DiffCache, base: TreeId, ours: TreeId, theirs: TreeId) -> StorageResult<TreeMerge> {
    let our_changes = cache.diff(repo, base, ours, None)?;
    let their_changes = cache.diff(repo, base, theirs, None)?;

    let ours_by_path: HashMap<&str, &DiffEntry> = our_changes.iter().map(|e| (e.path.as_str(), e)).collect();

    let ours_tree = TreeHandle::find(repo, ours)?;
    let mut mutator = TreeMutator::from_tree(repo, &ours_tree);
    let mut conflicts = Vec::new();
    let mut touched_layers = BTreeSet::new();
    let mut applied = 0;

    for theirs_entry in their_changes.iter() {
        match ours_by_path.get(theirs_entry.path.as_str()) {
            None => {
                mutator.set_feature(&node_path(&theirs_entry.path)?, theirs_entry.new);
                applied += 1;
                let layer = theirs_entry.parent_path();
                if !layer.is_empty() {
                    touched_layers.insert(layer.to_string());
                }
            }
            Some(ours_entry) if ours_entry.new == theirs_entry.new => {}
            Some(ours_entry) => conflicts.push(ConflictPath {
                path: theirs_entry.path.clone(),
                ancestor: theirs_entry.old,
                ours: ours_entry.new,
                theirs: theirs_entry.new,
            }),
        }
    }

    // a layer's feature type follows theirs only where ours left it alone
    let base_tree = TreeHandle::find(repo, base)?;
    let theirs_tree = TreeHandle::find(repo, theirs)?;
    for layer in touched_layers {
        let layer = node_path(&layer)?;
        let t = theirs_tree.feature_type_id(repo, Some(&layer))?;
        let o = ours_tree.feature_type_id(repo, Some(&layer))?;
        let b = base_tree.feature_type_id(repo, Some(&layer))?;
        if let Some(t) = t {
            if Some(t) != o && o == b {
                mutator.put_feature_type(&layer, t);
            }
        }
    }

    let tree = mutator.write()?;
    tracing::debug!(%base, %ours, %theirs, applied, conflicts = conflicts.len(), "merged snapshots");

    Ok(TreeMerge { tree, conflicts, applied })
}
