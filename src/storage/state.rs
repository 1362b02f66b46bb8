//! Persistent workspace state.
//!
//! Besides refs, a repository keeps a small JSON record next to the object
//! store with the working tree (WORK_HEAD), the index (STAGE_HEAD), the
//! operation in progress and its unresolved conflicts. The record is
//! replaced atomically on every save.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use git2::Repository;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::storage::commit;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::tree::empty_tree;
use crate::storage::types::{BranchName, CommitId, FeatureId, TreeId};

/// file name of the state record inside the git directory
pub const STATE_FILE: &str = "GEOGIG_STATE";

/// One side of a conflict: the feature as seen from a commit.
///
/// `feature` is `None` when the path doesn't exist on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureVersion {
    pub commit: Option<CommitId>,
    pub feature: Option<FeatureId>,
}

/// A path both sides of a merge changed differently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub path: String,
    pub ancestor: FeatureVersion,
    pub ours: FeatureVersion,
    pub theirs: FeatureVersion,
}

/// Bookkeeping for a paused rebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseState {
    /// branch being rebased; `None` when HEAD was detached
    pub branch: Option<BranchName>,
    /// HEAD before the rebase started
    pub orig_head: CommitId,
    pub onto: CommitId,
    /// tip of the rewritten history so far
    pub tip: CommitId,
    /// commit whose replay stopped on conflicts
    pub current: Option<CommitId>,
    /// commits still to replay, oldest first
    pub remaining: Vec<CommitId>,
    pub replayed: usize,
}

/// The multi-step operation currently in progress.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Clean,
    Merging {
        ours: CommitId,
        theirs: CommitId,
        message: String,
    },
    Rebasing(RebaseState),
}

/// The whole persisted workspace record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryState {
    pub work_head: TreeId,
    pub stage_head: TreeId,
    #[serde(default)]
    pub operation: Operation,
    /// workspace to restore when the operation is aborted
    #[serde(default)]
    pub saved: Option<(TreeId, TreeId)>,
    #[serde(default)]
    pub conflicts: BTreeMap<String, ConflictEntry>,
    pub created_at: DateTime<Utc>,
}

impl RepositoryState {
    fn location(repo: &Repository) -> PathBuf {
        repo.path().join(STATE_FILE)
    }

    /// tree of the HEAD commit, or the empty tree on an unborn branch
    pub fn head_tree(repo: &Repository) -> StorageResult<TreeId> {
        match RefManager::head_commit(repo)? {
            Some(head) => Ok(commit::get_commit(repo, head)?.tree_id),
            None => empty_tree(repo),
        }
    }

    /// a clean record whose working tree and index match HEAD
    pub fn fresh(repo: &Repository) -> StorageResult<Self> {
        let tree = Self::head_tree(repo)?;
        Ok(Self {
            work_head: tree,
            stage_head: tree,
            operation: Operation::Clean,
            saved: None,
            conflicts: BTreeMap::new(),
            created_at: Utc::now(),
        })
    }

    /// load the record, creating a fresh one if none was saved yet
    pub fn load(repo: &Repository) -> StorageResult<Self> {
        let path = Self::location(repo);
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StorageError::CorruptedData {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::fresh(repo),
            Err(e) => Err(e.into()),
        }
    }

    /// write the record atomically
    pub fn save(&self, repo: &Repository) -> StorageResult<()> {
        let path = Self::location(repo);
        let mut file = NamedTempFile::new_in(repo.path())?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.flush()?;
        file.persist(&path).map_err(|e| StorageError::Io(e.error))?;
        Ok(())
    }

    pub fn is_clean(&self) -> bool {
        self.operation == Operation::Clean
    }

    /// drop any operation and its conflicts
    pub fn clear_operation(&mut self) {
        self.operation = Operation::Clean;
        self.saved = None;
        self.conflicts.clear();
    }

    /// point both working tree and index at the same snapshot
    pub fn set_workspace(&mut self, tree: TreeId) {
        self.work_head = tree;
        self.stage_head = tree;
    }
}
