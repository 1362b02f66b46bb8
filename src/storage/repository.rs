//! Core Git repository wrapper.
//!
//! This wraps a bare `git2::Repository` living in `<root>/.geogig` with
//! serialized, time-bounded access. Every other storage module receives the
//! `&git2::Repository` handed out by [`GitRepository::with_repo`].
//!
//! Access is guarded twice: a mutex serializes clones of one handle, and an
//! exclusive lock on `<root>/.geogig/geogig.lock` serializes independently
//! opened handles and other processes.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use git2::Repository;
use parking_lot::Mutex;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::state::RepositoryState;
use crate::storage::types::BranchName;

/// name of the directory holding the object store
pub const GEOGIG_DIR: &str = ".geogig";

/// lock file inside the object store held while a caller has access
pub const LOCK_FILE: &str = "geogig.lock";

/// Thread-safe handle to the object store.
///
/// Clone this to share across threads - it uses Arc internally. Access is
/// exclusive across handles and processes: one caller at a time holds the
/// repository, others wait up to the lock timeout and then fail with
/// `RepositoryBusy`.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    repo: Mutex<Repository>,
    root: PathBuf,
    lock_timeout: Duration,
}

impl GitRepository {
    fn from_parts(root: &Path, repo: Repository, lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                root: root.to_path_buf(),
                lock_timeout,
            }),
        }
    }

    /// Open an existing repository rooted at `root`.
    pub fn open(root: impl AsRef<Path>, lock_timeout: Duration) -> StorageResult<Self> {
        let root = root.as_ref();
        let git_dir = root.join(GEOGIG_DIR);
        if !git_dir.is_dir() {
            return Err(StorageError::NotARepository(root.to_path_buf()));
        }
        let repo = Repository::open_bare(&git_dir).map_err(|_| StorageError::NotARepository(root.to_path_buf()))?;
        Ok(Self::from_parts(root, repo, lock_timeout))
    }

    /// Initialize a new, empty repository at `root`.
    ///
    /// HEAD starts out on an unborn `master` branch.
    pub fn init(root: impl AsRef<Path>, lock_timeout: Duration) -> StorageResult<Self> {
        let root = root.as_ref();
        let git_dir = root.join(GEOGIG_DIR);
        if git_dir.exists() {
            return Err(StorageError::RepositoryAlreadyExists(root.to_path_buf()));
        }
        std::fs::create_dir_all(root)?;

        let repo = Repository::init_bare(&git_dir)?;
        repo.set_head(&BranchName::master().as_ref_path())?;
        RepositoryState::fresh(&repo)?.save(&repo)?;

        Ok(Self::from_parts(root, repo, lock_timeout))
    }

    /// Wrap a repository that was just cloned into `<root>/.geogig`.
    pub(crate) fn adopt(root: impl AsRef<Path>, repo: Repository, lock_timeout: Duration) -> StorageResult<Self> {
        RepositoryState::fresh(&repo)?.save(&repo)?;
        Ok(Self::from_parts(root.as_ref(), repo, lock_timeout))
    }

    /// Get the repository root.
    pub fn path(&self) -> &Path {
        &self.inner.root
    }

    /// Get the directory of the object store.
    pub fn git_dir(&self) -> PathBuf {
        self.inner.root.join(GEOGIG_DIR)
    }

    /// Execute a function with exclusive access to the repository.
    pub fn with_repo<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Repository) -> Result<T, E>,
        E: From<StorageError>,
    {
        let timeout = self.inner.lock_timeout;
        let deadline = Instant::now() + timeout;
        let repo = self
            .inner
            .repo
            .try_lock_for(timeout)
            .ok_or(StorageError::RepositoryBusy(timeout))?;
        // released when dropped at the end of this call
        let _lock = self.lock_store(deadline)?;
        f(&repo)
    }

    /// take the exclusive file lock, retrying with backoff until `deadline`
    fn lock_store(&self, deadline: Instant) -> StorageResult<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.git_dir().join(LOCK_FILE))?;

        let mut delay = Duration::from_millis(1);
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => return Ok(file),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(Duration::from_millis(50));
                }
                Err(_) => return Err(StorageError::RepositoryBusy(self.inner.lock_timeout)),
            }
        }
    }
}
