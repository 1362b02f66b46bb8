//! Remotes: clone, fetch, push, pull and sync status.
//!
//! A remote is any git URL. A local geogig repository may be given by its
//! root directory; it is stored as the path of its object store.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use git2::build::RepoBuilder;
use git2::{ErrorCode, FetchOptions, PushOptions, RemoteCallbacks};

use crate::repo::api::{Repository, Session};
use crate::repo::config::RepositoryConfig;
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::ops::{MergeOutcome, RebaseOutcome};
use crate::repo::ORIGIN;
use crate::storage::{
    get_commit, BranchName, CommitMessage, GitRepository, HistoryIterator, RefManager, RepositoryState, StorageError,
    GEOGIG_DIR,
};

/// How `pull` integrated the fetched branch.
#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    Merged(MergeOutcome),
    Rebased(RebaseOutcome),
}

/// the URL to store for a remote
fn normalize_url(url: &str) -> String {
    let store = Path::new(url).join(GEOGIG_DIR);
    if store.is_dir() {
        store.to_string_lossy().into_owned()
    } else {
        url.to_string()
    }
}

/// root of the local geogig repository behind a remote URL, if it is one
fn local_root(url: &str) -> Option<PathBuf> {
    let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
    if path.file_name().is_some_and(|name| name == GEOGIG_DIR) && path.is_dir() {
        path.parent().map(Path::to_path_buf)
    } else if path.join(GEOGIG_DIR).is_dir() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

/// fetch options that give up once `timeout` has passed
fn fetch_options<'cb>(timeout: Duration) -> FetchOptions<'cb> {
    let started = Instant::now();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.transfer_progress(move |_stats| started.elapsed() < timeout);

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}

fn transfer_error(remote: &str, timeout: Duration, error: git2::Error) -> RepoError {
    if error.code() == ErrorCode::User {
        RepoError::TransferTimeout {
            remote: remote.to_string(),
            secs: timeout.as_secs(),
        }
    } else {
        error.into()
    }
}

impl Repository {
    /// Clone `url` into a new repository at `path`.
    ///
    /// The source becomes the `origin` remote and its default branch is
    /// checked out.
    pub fn clone_from(url: &str, path: impl AsRef<Path>) -> RepoResult<Self> {
        Self::clone_with_config(url, RepositoryConfig::new(path.as_ref()))
    }

    /// Clone with custom configuration.
    pub fn clone_with_config(url: &str, config: RepositoryConfig) -> RepoResult<Self> {
        let git_dir = config.path.join(GEOGIG_DIR);
        if git_dir.exists() {
            return Err(StorageError::RepositoryAlreadyExists(config.path.clone()).into());
        }
        std::fs::create_dir_all(&config.path).map_err(StorageError::from)?;

        let source = normalize_url(url);
        let repo = RepoBuilder::new()
            .bare(true)
            .fetch_options(fetch_options(config.transfer_timeout))
            .clone(&source, &git_dir)
            .map_err(|e| transfer_error(&source, config.transfer_timeout, e))?;

        let store = GitRepository::adopt(&config.path, repo, config.lock_timeout)?;
        tracing::info!(url = %source, path = %config.path.display(), "cloned repository");
        Ok(Self::from_store(store, config))
    }

    /// Configured remotes as `(name, url)` pairs.
    pub fn remotes(&self) -> RepoResult<Vec<(String, String)>> {
        self.read(|s| s.remotes())
    }

    /// Register a remote.
    pub fn add_remote(&self, name: &str, url: &str) -> RepoResult<()> {
        self.write(|s| {
            if s.repo.find_remote(name).is_ok() {
                return Err(StorageError::RemoteAlreadyExists(name.to_string()).into());
            }
            let url = normalize_url(url);
            s.repo.remote(name, &url)?;
            tracing::info!(remote = name, url = %url, "added remote");
            Ok(())
        })
    }

    pub fn remove_remote(&self, name: &str) -> RepoResult<()> {
        self.write(|s| {
            s.find_remote(name)?;
            s.repo.remote_delete(name)?;
            tracing::info!(remote = name, "removed remote");
            Ok(())
        })
    }

    /// Download the branches of a remote into `refs/remotes/<remote>/`.
    pub fn fetch(&self, remote: &str) -> RepoResult<()> {
        self.write(|s| s.fetch(remote))
    }

    /// Push a branch (the current one by default) to a remote.
    pub fn push(&self, remote: &str, branch: Option<&str>) -> RepoResult<()> {
        self.write(|s| {
            let branch = s.target_branch(branch)?;
            s.push(remote, &branch)
        })
    }

    /// Fetch a remote and integrate its copy of a branch (the current one
    /// by default) into HEAD by merging or rebasing.
    pub fn pull(&self, remote: &str, branch: Option<&str>, rebase: bool) -> RepoResult<PullOutcome> {
        self.write(|s| {
            let branch = s.target_branch(branch)?;
            s.fetch(remote)?;
            let theirs = s.resolve(&format!("refs/remotes/{}/{}", remote, branch))?;
            if rebase {
                Ok(PullOutcome::Rebased(s.rebase(theirs)?))
            } else {
                let message = CommitMessage::merge_remote(remote, branch.as_str());
                Ok(PullOutcome::Merged(s.merge(theirs, false, message)?))
            }
        })
    }

    /// How many commits a branch (the current one by default) is ahead of
    /// and behind its copy on the preferred remote (`origin` when present).
    pub fn synced(&self, branch: Option<&str>) -> RepoResult<(usize, usize)> {
        self.write(|s| {
            let branch = s.target_branch(branch)?;
            let remotes = s.remotes()?;
            let remote = remotes
                .iter()
                .find(|(name, _)| name == ORIGIN)
                .or_else(|| remotes.first())
                .map(|(name, _)| name.clone())
                .ok_or(RepoError::NoRemotes)?;
            s.fetch(&remote)?;

            let local = RefManager::resolve_branch(s.repo, &branch)?;
            let tracking = format!("refs/remotes/{}/{}", remote, branch);
            match s.repo.refname_to_id(&tracking) {
                Ok(upstream) => Ok(s.repo.graph_ahead_behind(local.raw(), upstream)?),
                Err(e) if e.code() == ErrorCode::NotFound => {
                    let ahead = HistoryIterator::new(s.repo, local)?.count();
                    Ok((ahead, 0))
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}

impl Session<'_> {
    fn remotes(&self) -> RepoResult<Vec<(String, String)>> {
        let names = self.repo.remotes()?;
        let mut result = Vec::new();
        for name in names.iter().flatten() {
            let remote = self.repo.find_remote(name)?;
            result.push((name.to_string(), remote.url().unwrap_or_default().to_string()));
        }
        Ok(result)
    }

    /// the named branch, or the one HEAD is on
    fn target_branch(&self, branch: Option<&str>) -> RepoResult<BranchName> {
        match branch {
            Some(name) => Ok(BranchName::new(name)?),
            None => self.head_state()?.branch().cloned().ok_or(RepoError::DetachedHead),
        }
    }

    fn find_remote(&self, name: &str) -> RepoResult<git2::Remote<'_>> {
        self.repo.find_remote(name).map_err(|e| match e.code() {
            ErrorCode::NotFound | ErrorCode::InvalidSpec => StorageError::RemoteNotFound(name.to_string()).into(),
            _ => e.into(),
        })
    }

    fn fetch(&self, remote: &str) -> RepoResult<()> {
        let mut handle = self.find_remote(remote)?;
        let timeout = self.config.transfer_timeout;
        let mut options = fetch_options(timeout);
        handle
            .fetch::<&str>(&[], Some(&mut options), None)
            .map_err(|e| transfer_error(remote, timeout, e))?;
        tracing::info!(remote, "fetched");
        Ok(())
    }

    /// Push a branch, keeping a local receiver's workspace consistent.
    ///
    /// When the receiver has the branch checked out, the push only goes
    /// through if its workspace matches its HEAD, and the workspace then
    /// moves to the pushed commit.
    fn push(&self, remote: &str, branch: &BranchName) -> RepoResult<()> {
        let url = self.find_remote(remote)?.url().map(str::to_string);
        let Some(root) = url.as_deref().and_then(local_root) else {
            return self.send(remote, branch);
        };
        let receiver = GitRepository::open(&root, self.config.lock_timeout)?;
        receiver.with_repo(|target| {
            if RefManager::head_state(target)?.branch() != Some(branch) {
                return self.send(remote, branch);
            }
            let mut state = RepositoryState::load(target)?;
            let head_tree = RepositoryState::head_tree(target)?;
            if !state.is_clean() || state.work_head != head_tree || state.stage_head != head_tree {
                return Err(RepoError::PushRejected {
                    reference: branch.as_ref_path(),
                    reason: "branch is checked out in a workspace with local changes".to_string(),
                });
            }

            self.send(remote, branch)?;
            let tip = RefManager::resolve_branch(self.repo, branch)?;
            state.set_workspace(get_commit(self.repo, tip)?.tree_id);
            state.save(target)?;
            tracing::debug!(remote, branch = %branch, "moved receiver workspace");
            Ok(())
        })
    }

    fn send(&self, remote: &str, branch: &BranchName) -> RepoResult<()> {
        let mut handle = self.find_remote(remote)?;
        let reference = branch.as_ref_path();
        let refspec = format!("{}:{}", reference, reference);

        let rejection: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));
        let rejection_slot = Rc::clone(&rejection);
        let mut callbacks = RemoteCallbacks::new();
        callbacks.push_update_reference(move |_refname, status| {
            if let Some(message) = status {
                *rejection_slot.borrow_mut() = Some(message.to_string());
            }
            Ok(())
        });
        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        match handle.push(&[refspec.as_str()], Some(&mut options)) {
            Ok(()) => {}
            Err(e) if e.code() == ErrorCode::NotFastForward => {
                return Err(RepoError::PushRejected {
                    reference,
                    reason: e.message().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        }

        let rejected = rejection.borrow_mut().take();
        if let Some(reason) = rejected {
            return Err(RepoError::PushRejected { reference, reason });
        }
        tracing::info!(remote, branch = %branch, "pushed");
        Ok(())
    }
}
