//! Working tree and index operations.
//!
//! Edits land in WORK_HEAD, `stage` copies them into STAGE_HEAD and
//! `commit` turns STAGE_HEAD into a commit on top of HEAD.

use std::collections::{btree_map, BTreeMap, BTreeSet};

use crate::repo::api::{Repository, Session};
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::HEAD;
use crate::storage::{
    get_commit, get_feature_type, is_within, put_feature, put_feature_type, BranchName, CommitInfo, Feature,
    FeatureId, FeatureType, InvalidNameError, Node, NodePath, Operation, RefManager, ResetMode, StorageError,
    TreeMutator,
};

impl Repository {
    /// Add or replace a feature in the working tree.
    ///
    /// The feature's layer is created on first use and its feature type is
    /// extended with any attributes it didn't declare yet.
    pub fn insert_feature(&self, path: &str, feature: Feature) -> RepoResult<FeatureId> {
        let ids = self.insert_features(vec![(path.to_string(), feature)])?;
        ids.into_iter()
            .next()
            .ok_or_else(|| StorageError::Internal("insert produced no id".to_string()).into())
    }

    /// Add or replace several features in one working tree update.
    pub fn insert_features(&self, features: Vec<(String, Feature)>) -> RepoResult<Vec<FeatureId>> {
        let features = features
            .into_iter()
            .map(|(path, feature)| Ok((NodePath::new(path)?, feature)))
            .collect::<RepoResult<Vec<_>>>()?;
        self.write(|s| s.insert_features(&features))
    }

    /// Remove features from the working tree and the index.
    pub fn remove_features(&self, paths: &[&str]) -> RepoResult<()> {
        let paths = parse_paths(paths)?;
        self.write(|s| s.remove_paths(&paths, false))
    }

    /// Remove whole trees from the working tree and the index.
    pub fn remove_trees(&self, paths: &[&str]) -> RepoResult<()> {
        let paths = parse_paths(paths)?;
        self.write(|s| s.remove_paths(&paths, true))
    }

    /// Copy working tree changes under `paths` into the index (all changes
    /// when `paths` is empty). Returns the number of staged changes.
    pub fn stage(&self, paths: &[&str]) -> RepoResult<usize> {
        self.write(|s| s.stage(paths))
    }

    /// Commit the index.
    pub fn commit(&self, message: &str) -> RepoResult<CommitInfo> {
        self.write(|s| s.commit(message))
    }

    /// Stage everything and commit it.
    pub fn add_and_commit(&self, message: &str) -> RepoResult<CommitInfo> {
        self.write(|s| {
            s.stage(&[])?;
            s.commit(message)
        })
    }

    /// Move HEAD to `rev`, resetting the index (MIXED) and working tree
    /// (HARD) along with it. Any paused merge or rebase is dropped.
    pub fn reset(&self, rev: &str, mode: ResetMode) -> RepoResult<()> {
        self.write(|s| s.reset(rev, mode))
    }

    /// Set one path in the index back to its version in `rev`.
    pub fn reset_path(&self, rev: &str, path: &str) -> RepoResult<()> {
        let path = NodePath::new(path)?;
        self.write(|s| s.reset_path(rev, &path))
    }

    /// Switch to a branch (HEAD stays attached) or a commit (HEAD detaches).
    ///
    /// Without `force` the working tree and index must match HEAD.
    pub fn checkout(&self, rev: &str, force: bool) -> RepoResult<()> {
        self.write(|s| s.checkout(rev, force))
    }

    /// Restore paths in the working tree and index from `rev`.
    pub fn checkout_paths(&self, rev: &str, paths: &[&str]) -> RepoResult<()> {
        let paths = parse_paths(paths)?;
        self.write(|s| s.checkout_paths(rev, &paths))
    }
}

fn parse_paths(paths: &[&str]) -> RepoResult<Vec<NodePath>> {
    paths.iter().map(|p| Ok(NodePath::new(*p)?)).collect()
}

impl Session<'_> {
    pub(crate) fn insert_features(&mut self, features: &[(NodePath, Feature)]) -> RepoResult<Vec<FeatureId>> {
        let work = self.tree(self.state.work_head)?;
        let mut mutator = TreeMutator::from_tree(self.repo, &work);
        let mut layer_types: BTreeMap<NodePath, (FeatureType, bool)> = BTreeMap::new();
        let mut ids = Vec::with_capacity(features.len());

        for (path, feature) in features {
            let layer = path
                .parent()
                .ok_or_else(|| StorageError::InvalidName(InvalidNameError::InvalidPath(path.to_string())))?;
            let id = put_feature(self.repo, feature)?;
            mutator.put_feature(path, id);

            let slot = match layer_types.entry(layer) {
                btree_map::Entry::Occupied(entry) => entry.into_mut(),
                btree_map::Entry::Vacant(entry) => {
                    let current = match work.feature_type_id(self.repo, Some(entry.key()))? {
                        Some(type_id) => get_feature_type(self.repo, type_id)?,
                        None => FeatureType::default(),
                    };
                    entry.insert((current, false))
                }
            };
            if slot.0.extend_with(feature) {
                slot.1 = true;
            }
            ids.push(id);
        }

        for (layer, (feature_type, changed)) in layer_types {
            if changed {
                let type_id = put_feature_type(self.repo, &feature_type)?;
                mutator.put_feature_type(&layer, type_id);
            }
        }

        self.state.work_head = mutator.write()?;
        tracing::debug!(count = ids.len(), "inserted features");
        Ok(ids)
    }

    pub(crate) fn remove_paths(&mut self, paths: &[NodePath], trees: bool) -> RepoResult<()> {
        let work = self.tree(self.state.work_head)?;
        let mut work_mutator = TreeMutator::from_tree(self.repo, &work);
        let mut stage_mutator = TreeMutator::from_id(self.repo, self.state.stage_head)?;

        for path in paths {
            match (work.entry_at(path)?, trees) {
                (Some(Node::Feature { .. }), false) | (Some(Node::Tree { .. }), true) => {}
                (_, false) => return Err(StorageError::FeatureNotFound(path.to_string()).into()),
                (_, true) => return Err(StorageError::TreeNotFound(path.to_string()).into()),
            }
            work_mutator.remove(path);
            stage_mutator.remove(path);
        }

        self.state.work_head = work_mutator.write()?;
        self.state.stage_head = stage_mutator.write()?;
        tracing::debug!(count = paths.len(), trees, "removed paths");
        Ok(())
    }

    pub(crate) fn stage(&mut self, paths: &[&str]) -> RepoResult<usize> {
        let selected = |path: &str| paths.is_empty() || paths.iter().any(|p| is_within(path, p));

        let changes = self.diff(self.state.stage_head, self.state.work_head, None)?;
        let work = self.tree(self.state.work_head)?;
        let mut mutator = TreeMutator::from_id(self.repo, self.state.stage_head)?;
        let mut layers = BTreeSet::new();
        let mut staged = 0;

        for entry in changes.iter().filter(|e| selected(&e.path)) {
            mutator.set_feature(&NodePath::new(entry.path.as_str())?, entry.new);
            let layer = entry.parent_path();
            if !layer.is_empty() {
                layers.insert(layer.to_string());
            }
            staged += 1;
        }

        for layer in layers {
            let layer = NodePath::new(layer)?;
            match work.feature_type_id(self.repo, Some(&layer))? {
                Some(type_id) => mutator.put_feature_type(&layer, type_id),
                None if work.entry_at(&layer)?.is_none() && selected(layer.as_str()) => mutator.remove(&layer),
                None => {}
            }
        }

        self.state.stage_head = mutator.write()?;
        // staging a conflicted path marks it resolved
        self.state.conflicts.retain(|path, _| !selected(path));
        tracing::debug!(staged, "staged changes");
        Ok(staged)
    }

    pub(crate) fn commit(&mut self, message: &str) -> RepoResult<CommitInfo> {
        if let Operation::Rebasing(_) = self.state.operation {
            return Err(RepoError::OperationInProgress("rebase"));
        }
        if !self.state.conflicts.is_empty() {
            return Err(RepoError::ConflictsRemain(self.state.conflicts.len()));
        }

        let head = self.head_commit()?;
        let mut parents: Vec<_> = head.into_iter().collect();
        let mut message = message.to_string();
        let merging = match &self.state.operation {
            Operation::Merging {
                theirs,
                message: merge_message,
                ..
            } => {
                parents.push(*theirs);
                if message.is_empty() {
                    message = merge_message.clone();
                }
                true
            }
            _ => false,
        };

        if !merging && self.state.stage_head == self.head_tree()? {
            return Err(RepoError::NothingToCommit);
        }

        let id = self.create_commit(self.state.stage_head, parents, &message, None)?;
        RefManager::advance_head(self.repo, id, "commit")?;
        self.state.clear_operation();

        let info = get_commit(self.repo, id)?;
        tracing::info!(commit = %id.short(), summary = info.summary(), "created commit");
        Ok(info)
    }

    pub(crate) fn reset(&mut self, rev: &str, mode: ResetMode) -> RepoResult<()> {
        if mode == ResetMode::Soft {
            self.ensure_clean()?;
        }
        let target = self.resolve(rev)?;
        let tree = get_commit(self.repo, target)?.tree_id;
        RefManager::advance_head(self.repo, target, "reset")?;

        match mode {
            ResetMode::Soft => {}
            ResetMode::Mixed => self.state.stage_head = tree,
            ResetMode::Hard => self.state.set_workspace(tree),
        }
        self.state.clear_operation();
        tracing::info!(commit = %target.short(), ?mode, "reset");
        Ok(())
    }

    pub(crate) fn reset_path(&mut self, rev: &str, path: &NodePath) -> RepoResult<()> {
        let source = self.tree(self.resolve_tree(rev)?)?;
        let mut mutator = TreeMutator::from_id(self.repo, self.state.stage_head)?;
        match source.entry_at(path)? {
            Some(Node::Feature { id, .. }) => mutator.put_feature(path, id),
            Some(Node::Tree { id, .. }) => mutator.put_tree(path, id),
            None => mutator.remove(path),
        }
        self.state.stage_head = mutator.write()?;
        self.state.conflicts.retain(|p, _| !is_within(p, path.as_str()));
        Ok(())
    }

    pub(crate) fn checkout(&mut self, rev: &str, force: bool) -> RepoResult<()> {
        if force {
            self.state.clear_operation();
        } else {
            self.ensure_clean()?;
            self.ensure_no_changes()?;
        }

        if rev == HEAD {
            let tree = self.head_tree()?;
            self.state.set_workspace(tree);
            return Ok(());
        }

        let branch = BranchName::new(rev)
            .ok()
            .filter(|b| RefManager::branch_exists(self.repo, b));
        match branch {
            Some(branch) => {
                let commit = RefManager::resolve_branch(self.repo, &branch)?;
                RefManager::attach_head(self.repo, &branch)?;
                self.state.set_workspace(get_commit(self.repo, commit)?.tree_id);
                tracing::info!(branch = %branch, "switched branch");
            }
            None => {
                let commit = self.resolve(rev)?;
                RefManager::detach_head(self.repo, commit)?;
                self.state.set_workspace(get_commit(self.repo, commit)?.tree_id);
                tracing::info!(commit = %commit.short(), "detached HEAD");
            }
        }
        Ok(())
    }

    pub(crate) fn checkout_paths(&mut self, rev: &str, paths: &[NodePath]) -> RepoResult<()> {
        let source = self.tree(self.resolve_tree(rev)?)?;
        let mut work = TreeMutator::from_id(self.repo, self.state.work_head)?;
        let mut stage = TreeMutator::from_id(self.repo, self.state.stage_head)?;

        for path in paths {
            match source.entry_at(path)? {
                Some(Node::Feature { id, .. }) => {
                    work.put_feature(path, id);
                    stage.put_feature(path, id);
                }
                Some(Node::Tree { id, .. }) => {
                    work.put_tree(path, id);
                    stage.put_tree(path, id);
                }
                None => return Err(StorageError::FeatureNotFound(path.to_string()).into()),
            }
        }

        self.state.work_head = work.write()?;
        self.state.stage_head = stage.write()?;
        self.state
            .conflicts
            .retain(|p, _| !paths.iter().any(|path| is_within(p, path.as_str())));
        Ok(())
    }
}
