//! Merge, rebase and cherry-pick.
//!
//! All three replay changes through [`merge_trees`]. A merge or rebase that
//! hits conflicts pauses: the workspace record keeps the operation, the
//! conflicts and the workspace to restore on `abort`, and the call fails
//! with [`RepoError::Conflict`].

use crate::merge::{merge_trees, ConflictEntry, ConflictPath, Resolution, Side};
use crate::repo::api::{Repository, Session};
use crate::repo::error::{RepoError, RepoResult};
use crate::storage::{
    commits_to_replay, empty_tree, find_merge_base, get_commit, is_ancestor, put_feature, CommitId, CommitInfo,
    CommitMessage, NodePath, Operation, RebaseState, RefManager, TreeId, TreeMutator,
};

/// Options for [`Repository::merge`].
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// stage the merged snapshot instead of committing it
    pub no_commit: bool,
    /// message for the merge commit (defaults to "Merge branch '<rev>'")
    pub message: Option<String>,
}

impl MergeOptions {
    pub fn no_commit(mut self, value: bool) -> Self {
        self.no_commit = value;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// How a merge finished.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// theirs was already part of HEAD's history
    UpToDate,
    /// HEAD moved forward to theirs
    FastForward(CommitId),
    /// a merge commit was created
    Merged(CommitInfo),
    /// the merged snapshot was staged without committing
    Staged { applied: usize },
}

/// How a rebase finished.
#[derive(Debug, Clone, PartialEq)]
pub enum RebaseOutcome {
    UpToDate,
    FastForward(CommitId),
    /// `replayed` commits were rewritten on top of the new base
    Rebased { head: CommitId, replayed: usize },
}

impl Repository {
    /// Unresolved conflicts of the paused operation.
    pub fn conflicts(&self) -> RepoResult<Vec<ConflictEntry>> {
        self.read(|s| Ok(s.state.conflicts.values().cloned().collect()))
    }

    pub fn is_merging(&self) -> RepoResult<bool> {
        self.read(|s| Ok(matches!(s.state.operation, Operation::Merging { .. })))
    }

    pub fn is_rebasing(&self) -> RepoResult<bool> {
        self.read(|s| Ok(matches!(s.state.operation, Operation::Rebasing(_))))
    }

    /// The message the paused merge will be committed with.
    pub fn merge_message(&self) -> RepoResult<Option<String>> {
        self.read(|s| match &s.state.operation {
            Operation::Merging { message, .. } => Ok(Some(message.clone())),
            _ => Ok(None),
        })
    }

    /// Merge `rev` into HEAD.
    ///
    /// Requires a clean workspace. On conflicts the merge pauses: resolve
    /// the conflicts and `commit`, or `abort`.
    pub fn merge(&self, rev: &str, options: MergeOptions) -> RepoResult<MergeOutcome> {
        self.write(|s| {
            let theirs = s.resolve(rev)?;
            let message = options.message.clone().unwrap_or_else(|| CommitMessage::merge(rev));
            s.merge(theirs, options.no_commit, message)
        })
    }

    /// Resolve one conflicted path and stage the result.
    pub fn resolve_conflict(&self, path: &str, resolution: Resolution) -> RepoResult<()> {
        let path = NodePath::new(path)?;
        self.write(|s| s.resolve_conflict(&path, resolution))
    }

    /// Resolve several conflicted paths (all of them when `paths` is empty)
    /// by taking one side.
    pub fn resolve_conflicts(&self, paths: &[&str], side: Side) -> RepoResult<usize> {
        self.write(|s| {
            let targets: Vec<String> = if paths.is_empty() {
                s.state.conflicts.keys().cloned().collect()
            } else {
                paths.iter().map(|p| p.to_string()).collect()
            };
            for path in &targets {
                s.resolve_conflict(&NodePath::new(path.as_str())?, side.into())?;
            }
            Ok(targets.len())
        })
    }

    /// Abandon a paused merge or rebase, restoring HEAD and the workspace
    /// as they were before it started.
    pub fn abort(&self) -> RepoResult<()> {
        self.write(|s| s.abort())
    }

    /// Replay the commits of HEAD that `onto` lacks on top of `onto`.
    ///
    /// Authors and messages are kept, merge commits are dropped. On
    /// conflicts the rebase pauses with HEAD detached at the last replayed
    /// commit; resolve and `continue_`, or `abort`.
    pub fn rebase(&self, onto: &str) -> RepoResult<RebaseOutcome> {
        self.write(|s| {
            let upstream = s.resolve(onto)?;
            s.rebase(upstream)
        })
    }

    /// Resume a paused rebase once its conflicts are resolved.
    pub fn continue_(&self) -> RepoResult<RebaseOutcome> {
        self.write(|s| s.continue_rebase())
    }

    /// Apply the changes of a single commit on top of HEAD.
    ///
    /// Conflicts don't pause anything: the working tree is left with the
    /// attempted result and the call fails.
    pub fn cherry_pick(&self, rev: &str) -> RepoResult<CommitInfo> {
        self.write(|s| s.cherry_pick(rev))
    }
}

fn conflict_list(paths: Vec<ConflictPath>, base: Option<CommitId>, ours: CommitId, theirs: CommitId) -> Vec<ConflictEntry> {
    paths
        .into_iter()
        .map(|c| c.into_entry(base, Some(ours), Some(theirs)))
        .collect()
}

impl Session<'_> {
    fn tree_of(&self, commit: Option<CommitId>) -> RepoResult<TreeId> {
        match commit {
            Some(id) => Ok(get_commit(self.repo, id)?.tree_id),
            None => Ok(empty_tree(self.repo)?),
        }
    }

    /// record a paused operation and fail with its conflicts
    fn pause<T>(&mut self, operation: Operation, tree: TreeId, conflicts: Vec<ConflictEntry>) -> RepoResult<T> {
        if self.state.saved.is_none() {
            self.state.saved = Some((self.state.work_head, self.state.stage_head));
        }
        self.state.operation = operation;
        self.state.set_workspace(tree);
        self.state.conflicts = conflicts.iter().map(|c| (c.path.clone(), c.clone())).collect();
        tracing::warn!(conflicts = conflicts.len(), "operation paused on conflicts");
        Err(RepoError::Conflict { conflicts })
    }

    pub(crate) fn merge(&mut self, theirs: CommitId, no_commit: bool, message: String) -> RepoResult<MergeOutcome> {
        self.ensure_clean()?;
        self.ensure_no_changes()?;

        let Some(ours) = self.head_commit()? else {
            self.move_head_to(theirs, "merge: fast-forward")?;
            return Ok(MergeOutcome::FastForward(theirs));
        };
        if is_ancestor(self.repo, theirs, ours)? {
            return Ok(MergeOutcome::UpToDate);
        }
        if !no_commit && !self.head_state()?.is_detached() && is_ancestor(self.repo, ours, theirs)? {
            self.move_head_to(theirs, "merge: fast-forward")?;
            tracing::info!(commit = %theirs.short(), "fast-forwarded");
            return Ok(MergeOutcome::FastForward(theirs));
        }

        let base = find_merge_base(self.repo, ours, theirs)?;
        let merged = merge_trees(
            self.repo,
            self.cache,
            self.tree_of(base)?,
            self.tree_of(Some(ours))?,
            self.tree_of(Some(theirs))?,
        )?;

        if !merged.is_clean() {
            let conflicts = conflict_list(merged.conflicts, base, ours, theirs);
            let operation = Operation::Merging { ours, theirs, message };
            return self.pause(operation, merged.tree, conflicts);
        }

        if no_commit {
            self.state.set_workspace(merged.tree);
            return Ok(MergeOutcome::Staged {
                applied: merged.applied,
            });
        }

        let id = self.create_commit(merged.tree, vec![ours, theirs], &message, None)?;
        self.move_head_to(id, "merge")?;
        tracing::info!(commit = %id.short(), "merged");
        Ok(MergeOutcome::Merged(get_commit(self.repo, id)?))
    }

    fn resolve_conflict(&mut self, path: &NodePath, resolution: Resolution) -> RepoResult<()> {
        let entry = self
            .state
            .conflicts
            .get(path.as_str())
            .cloned()
            .ok_or_else(|| RepoError::NotConflicted(path.to_string()))?;

        let feature = match resolution {
            Resolution::Ours => entry.ours.feature,
            Resolution::Theirs => entry.theirs.feature,
            Resolution::Feature(feature) => Some(put_feature(self.repo, &feature)?),
            Resolution::Delete => None,
        };

        let mut work = TreeMutator::from_id(self.repo, self.state.work_head)?;
        let mut stage = TreeMutator::from_id(self.repo, self.state.stage_head)?;
        work.set_feature(path, feature);
        stage.set_feature(path, feature);
        self.state.work_head = work.write()?;
        self.state.stage_head = stage.write()?;
        self.state.conflicts.remove(path.as_str());
        tracing::debug!(path = %path, remaining = self.state.conflicts.len(), "resolved conflict");
        Ok(())
    }

    fn abort(&mut self) -> RepoResult<()> {
        match &self.state.operation {
            Operation::Clean => return Err(RepoError::NotMerging),
            Operation::Merging { .. } => {}
            Operation::Rebasing(rebase) => {
                match &rebase.branch {
                    Some(branch) => {
                        RefManager::update_branch(self.repo, branch, rebase.orig_head)?;
                        RefManager::attach_head(self.repo, branch)?;
                    }
                    None => RefManager::detach_head(self.repo, rebase.orig_head)?,
                }
            }
        }

        let (work, stage) = match self.state.saved {
            Some(saved) => saved,
            None => {
                let head = self.head_tree()?;
                (head, head)
            }
        };
        self.state.clear_operation();
        self.state.work_head = work;
        self.state.stage_head = stage;
        tracing::info!("aborted operation");
        Ok(())
    }

    pub(crate) fn rebase(&mut self, upstream: CommitId) -> RepoResult<RebaseOutcome> {
        self.ensure_clean()?;
        self.ensure_no_changes()?;

        let head = self.head_state()?;
        let tip = self.require_head()?;
        if is_ancestor(self.repo, upstream, tip)? {
            return Ok(RebaseOutcome::UpToDate);
        }
        if is_ancestor(self.repo, tip, upstream)? {
            self.move_head_to(upstream, "rebase: fast-forward")?;
            return Ok(RebaseOutcome::FastForward(upstream));
        }

        let remaining = commits_to_replay(self.repo, tip, upstream)?;
        tracing::info!(onto = %upstream.short(), commits = remaining.len(), "rebasing");

        self.state.saved = Some((self.state.work_head, self.state.stage_head));
        self.state.operation = Operation::Rebasing(RebaseState {
            branch: head.branch().cloned(),
            orig_head: tip,
            onto: upstream,
            tip: upstream,
            current: None,
            remaining,
            replayed: 0,
        });
        RefManager::detach_head(self.repo, upstream)?;
        self.state.set_workspace(self.tree_of(Some(upstream))?);

        self.replay_pending()
    }

    fn rebase_state(&mut self) -> RepoResult<&mut RebaseState> {
        match &mut self.state.operation {
            Operation::Rebasing(rebase) => Ok(rebase),
            _ => Err(RepoError::NotRebasing),
        }
    }

    /// replay the remaining commits one by one, pausing on the first conflict
    fn replay_pending(&mut self) -> RepoResult<RebaseOutcome> {
        loop {
            let rebase = self.rebase_state()?;
            if rebase.remaining.is_empty() {
                break;
            }
            let next = rebase.remaining.remove(0);
            let tip = rebase.tip;

            let info = get_commit(self.repo, next)?;
            let tip_tree = self.tree_of(Some(tip))?;
            let merged = merge_trees(
                self.repo,
                self.cache,
                self.tree_of(info.first_parent())?,
                tip_tree,
                info.tree_id,
            )?;

            if !merged.is_clean() {
                let conflicts = conflict_list(merged.conflicts, info.first_parent(), tip, next);
                let mut rebase = self.rebase_state()?.clone();
                rebase.current = Some(next);
                return self.pause(Operation::Rebasing(rebase), merged.tree, conflicts);
            }
            if merged.tree == tip_tree {
                tracing::debug!(commit = %next.short(), "skipping commit already applied");
                continue;
            }
            self.commit_replayed(merged.tree, &info)?;
        }

        let rebase = self.rebase_state()?.clone();
        match &rebase.branch {
            Some(branch) => {
                RefManager::update_branch(self.repo, branch, rebase.tip)?;
                RefManager::attach_head(self.repo, branch)?;
            }
            None => RefManager::detach_head(self.repo, rebase.tip)?,
        }
        self.state.clear_operation();
        self.state.set_workspace(self.tree_of(Some(rebase.tip))?);
        tracing::info!(head = %rebase.tip.short(), replayed = rebase.replayed, "rebase finished");

        Ok(RebaseOutcome::Rebased {
            head: rebase.tip,
            replayed: rebase.replayed,
        })
    }

    /// commit a replayed snapshot on top of the rebase tip
    fn commit_replayed(&mut self, tree: TreeId, original: &CommitInfo) -> RepoResult<()> {
        let tip = self.rebase_state()?.tip;
        let id = self.create_commit(tree, vec![tip], &original.message, Some(original))?;
        RefManager::detach_head(self.repo, id)?;
        self.state.set_workspace(tree);

        let rebase = self.rebase_state()?;
        rebase.tip = id;
        rebase.replayed += 1;
        Ok(())
    }

    fn continue_rebase(&mut self) -> RepoResult<RebaseOutcome> {
        let rebase = self.rebase_state()?.clone();
        if !self.state.conflicts.is_empty() {
            return Err(RepoError::ConflictsRemain(self.state.conflicts.len()));
        }

        if let Some(current) = rebase.current {
            let info = get_commit(self.repo, current)?;
            let stage = self.state.stage_head;
            if stage != self.tree_of(Some(rebase.tip))? {
                self.commit_replayed(stage, &info)?;
            }
            self.rebase_state()?.current = None;
        }
        self.replay_pending()
    }

    fn cherry_pick(&mut self, rev: &str) -> RepoResult<CommitInfo> {
        self.ensure_clean()?;
        self.ensure_no_changes()?;

        let commit = self.resolve(rev)?;
        let head = self.require_head()?;
        let info = get_commit(self.repo, commit)?;
        let head_tree = self.tree_of(Some(head))?;

        let merged = merge_trees(
            self.repo,
            self.cache,
            self.tree_of(info.first_parent())?,
            head_tree,
            info.tree_id,
        )?;

        if !merged.is_clean() {
            self.state.work_head = merged.tree;
            let conflicts = conflict_list(merged.conflicts, info.first_parent(), head, commit);
            tracing::warn!(commit = %commit.short(), conflicts = conflicts.len(), "cherry-pick conflicts");
            return Err(RepoError::Conflict { conflicts });
        }
        if merged.tree == head_tree {
            return Err(RepoError::NothingToCommit);
        }

        let id = self.create_commit(merged.tree, vec![head], &info.message, Some(&info))?;
        self.move_head_to(id, "cherry-pick")?;
        tracing::info!(commit = %id.short(), from = %commit.short(), "cherry-picked");
        Ok(get_commit(self.repo, id)?)
    }
}
