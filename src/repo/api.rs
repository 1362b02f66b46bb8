//! Repository API - the high-level interface to a versioned feature store.
//!
//! Every public call takes the repository lock once, loads the workspace
//! record, runs inside a [`Session`] and, for mutating calls, saves the
//! record again. Calls therefore observe each other atomically.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::diff::{DiffCache, DiffEntry};
use crate::repo::config::{self, RepositoryConfig};
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::{HEAD, STAGE_HEAD, WORK_HEAD};
use crate::storage::{
    empty_tree, get_commit, get_tree_at_commit, BranchName, CommitBuilder, CommitId, CommitInfo, GitRepository,
    GitSignature, HeadState, Operation, RefManager, RepositoryState, StorageError, TagInfo, TagName, TreeHandle,
    TreeId,
};

/// The main repository handle.
///
/// Cheap to clone; clones share the lock and the diff cache.
#[derive(Clone)]
pub struct Repository {
    store: GitRepository,
    config: RepositoryConfig,
    diff_cache: Arc<DiffCache>,
}

/// Everything an operation needs while it holds the repository lock.
pub(crate) struct Session<'a> {
    pub(crate) repo: &'a git2::Repository,
    pub(crate) state: RepositoryState,
    pub(crate) cache: &'a DiffCache,
    pub(crate) config: &'a RepositoryConfig,
}

impl Repository {
    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> RepoResult<Self> {
        Self::open_with_config(RepositoryConfig::new(path.as_ref()))
    }

    /// Create a new, empty repository.
    pub fn init(path: impl AsRef<Path>) -> RepoResult<Self> {
        let config = RepositoryConfig::new(path.as_ref());
        let store = GitRepository::init(&config.path, config.lock_timeout)?;
        tracing::info!(path = %config.path.display(), "initialized repository");
        Ok(Self::from_store(store, config))
    }

    /// Open a repository with custom configuration.
    pub fn open_with_config(config: RepositoryConfig) -> RepoResult<Self> {
        let store = match GitRepository::open(&config.path, config.lock_timeout) {
            Ok(store) => store,
            Err(StorageError::NotARepository(_)) if config.create_if_missing => {
                tracing::info!(path = %config.path.display(), "initialized repository");
                GitRepository::init(&config.path, config.lock_timeout)?
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::from_store(store, config))
    }

    pub(crate) fn from_store(store: GitRepository, config: RepositoryConfig) -> Self {
        Self {
            store,
            config,
            diff_cache: Arc::new(DiffCache::new()),
        }
    }

    /// Get the repository root.
    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Get the options the repository was opened with.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// run a read-only operation
    pub(crate) fn read<T>(&self, f: impl FnOnce(&mut Session<'_>) -> RepoResult<T>) -> RepoResult<T> {
        self.store.with_repo(|repo| {
            let state = RepositoryState::load(repo)?;
            let mut session = Session {
                repo,
                state,
                cache: &self.diff_cache,
                config: &self.config,
            };
            f(&mut session)
        })
    }

    /// run a mutating operation and persist the workspace record
    ///
    /// the record is saved on success and on conflicts, which are the only
    /// failures that leave state behind.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&mut Session<'_>) -> RepoResult<T>) -> RepoResult<T> {
        self.store.with_repo(|repo| {
            let state = RepositoryState::load(repo)?;
            let mut session = Session {
                repo,
                state,
                cache: &self.diff_cache,
                config: &self.config,
            };
            let result = f(&mut session);
            match &result {
                Ok(_) => session.state.save(repo)?,
                Err(e) if e.is_conflict() => session.state.save(repo)?,
                Err(_) => {}
            }
            result
        })
    }

    // ==================== Refs ====================

    /// Where HEAD points.
    pub fn head(&self) -> RepoResult<HeadState> {
        self.read(|s| s.head_state())
    }

    pub fn is_detached(&self) -> RepoResult<bool> {
        Ok(self.head()?.is_detached())
    }

    /// Resolve a reference expression (`HEAD~1`, a branch, tag or id).
    pub fn resolve(&self, expr: &str) -> RepoResult<CommitId> {
        self.read(|s| s.resolve(expr))
    }

    /// Get information about a commit.
    pub fn commit_info(&self, expr: &str) -> RepoResult<CommitInfo> {
        self.read(|s| {
            let id = s.resolve(expr)?;
            Ok(get_commit(s.repo, id)?)
        })
    }

    /// List local branches with their tips.
    pub fn branches(&self) -> RepoResult<Vec<(BranchName, CommitId)>> {
        self.read(|s| Ok(RefManager::list_branches(s.repo)?))
    }

    /// Create a branch at `from`, optionally switching to it.
    pub fn create_branch(&self, name: &str, from: &str, checkout: bool) -> RepoResult<CommitId> {
        let branch = BranchName::new(name)?;
        self.write(|s| {
            let target = s.resolve(from)?;
            RefManager::create_branch(s.repo, &branch, target)?;
            tracing::info!(branch = %branch, commit = %target.short(), "created branch");
            if checkout {
                s.checkout(name, false)?;
            }
            Ok(target)
        })
    }

    /// Delete a branch.
    pub fn delete_branch(&self, name: &str) -> RepoResult<()> {
        let branch = BranchName::new(name)?;
        self.write(|s| {
            if s.head_state()?.branch() == Some(&branch) {
                return Err(RepoError::BranchCheckedOut(branch.to_string()));
            }
            RefManager::delete_branch(s.repo, &branch)?;
            tracing::info!(branch = %branch, "deleted branch");
            Ok(())
        })
    }

    /// List tags.
    pub fn tags(&self) -> RepoResult<Vec<TagInfo>> {
        self.read(|s| Ok(RefManager::list_tags(s.repo)?))
    }

    /// Create an annotated tag at `target`.
    pub fn create_tag(&self, name: &str, target: &str, message: &str) -> RepoResult<TagInfo> {
        let tag = TagName::new(name)?;
        self.write(|s| {
            let commit = s.resolve(target)?;
            let tagger = s.signature()?;
            let info = RefManager::create_tag(s.repo, &tag, commit, message, &tagger)?;
            tracing::info!(tag = %tag, commit = %commit.short(), "created tag");
            Ok(info)
        })
    }

    /// Delete a tag.
    pub fn delete_tag(&self, name: &str) -> RepoResult<()> {
        let tag = TagName::new(name)?;
        self.write(|s| Ok(RefManager::delete_tag(s.repo, &tag)?))
    }

    // ==================== Config ====================

    /// Read a repository setting such as `user.name`.
    pub fn get_config(&self, key: &str) -> RepoResult<Option<String>> {
        self.read(|s| config::get(s.repo, key))
    }

    /// Write a repository setting.
    pub fn set_config(&self, key: &str, value: &str) -> RepoResult<()> {
        self.write(|s| config::set(s.repo, key, value))
    }

    /// When the repository was created (or cloned).
    pub fn created_at(&self) -> RepoResult<DateTime<Utc>> {
        self.read(|s| Ok(s.state.created_at))
    }
}

impl<'a> Session<'a> {
    pub(crate) fn head_state(&self) -> RepoResult<HeadState> {
        Ok(RefManager::head_state(self.repo)?)
    }

    pub(crate) fn head_commit(&self) -> RepoResult<Option<CommitId>> {
        Ok(RefManager::head_commit(self.repo)?)
    }

    /// HEAD's commit, failing on an unborn branch
    pub(crate) fn require_head(&self) -> RepoResult<CommitId> {
        self.head_commit()?
            .ok_or_else(|| StorageError::InvalidReference(HEAD.to_string()).into())
    }

    /// HEAD's snapshot (the empty snapshot on an unborn branch)
    pub(crate) fn head_tree(&self) -> RepoResult<TreeId> {
        match self.head_commit()? {
            Some(id) => Ok(get_commit(self.repo, id)?.tree_id),
            None => Ok(empty_tree(self.repo)?),
        }
    }

    pub(crate) fn resolve(&self, expr: &str) -> RepoResult<CommitId> {
        Ok(RefManager::resolve(self.repo, expr)?)
    }

    /// resolve a revision to a snapshot
    ///
    /// besides commit expressions this accepts `WORK_HEAD` and `STAGE_HEAD`.
    pub(crate) fn resolve_tree(&self, rev: &str) -> RepoResult<TreeId> {
        match rev {
            WORK_HEAD => Ok(self.state.work_head),
            STAGE_HEAD => Ok(self.state.stage_head),
            HEAD => self.head_tree(),
            _ => {
                let id = self.resolve(rev)?;
                Ok(get_commit(self.repo, id)?.tree_id)
            }
        }
    }

    pub(crate) fn tree(&self, id: TreeId) -> RepoResult<TreeHandle<'a>> {
        Ok(TreeHandle::find(self.repo, id)?)
    }

    pub(crate) fn commit_tree(&self, commit: CommitId) -> RepoResult<TreeHandle<'a>> {
        Ok(get_tree_at_commit(self.repo, commit)?)
    }

    pub(crate) fn diff(&self, old: TreeId, new: TreeId, filter: Option<&str>) -> RepoResult<Arc<Vec<DiffEntry>>> {
        Ok(self.cache.diff(self.repo, old, new, filter)?)
    }

    pub(crate) fn signature(&self) -> RepoResult<GitSignature> {
        config::signature(self.repo)
    }

    /// fail if a merge or rebase is paused
    pub(crate) fn ensure_clean(&self) -> RepoResult<()> {
        match self.state.operation {
            Operation::Clean => Ok(()),
            Operation::Merging { .. } => Err(RepoError::OperationInProgress("merge")),
            Operation::Rebasing(_) => Err(RepoError::OperationInProgress("rebase")),
        }
    }

    /// fail if the working tree or index differ from HEAD
    pub(crate) fn ensure_no_changes(&self) -> RepoResult<()> {
        let head = self.head_tree()?;
        if self.state.work_head != head || self.state.stage_head != head {
            return Err(RepoError::UncommittedChanges);
        }
        Ok(())
    }

    /// write a commit with the configured committer
    pub(crate) fn create_commit(
        &self,
        tree: TreeId,
        parents: Vec<CommitId>,
        message: &str,
        author: Option<&CommitInfo>,
    ) -> RepoResult<CommitId> {
        let mut builder = CommitBuilder::new(self.repo)
            .tree(tree)
            .parents(parents)
            .message(message)
            .signature(self.signature()?);
        if let Some(original) = author {
            builder = builder.author(original.author(), Some(original.author_time));
        }
        Ok(builder.commit()?)
    }

    /// move HEAD (or its branch) to `commit` and reset the workspace to it
    pub(crate) fn move_head_to(&mut self, commit: CommitId, reason: &str) -> RepoResult<()> {
        RefManager::advance_head(self.repo, commit, reason)?;
        let tree = get_commit(self.repo, commit)?.tree_id;
        self.state.set_workspace(tree);
        Ok(())
    }
}
