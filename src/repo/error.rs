//! Repository error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::storage::{ConflictEntry, StorageError};

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors returned by the repository facade.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The operation stopped on conflicting changes.
    ///
    /// This is the only error that leaves state behind: the conflicts are
    /// recorded and the workspace holds the partially merged snapshot.
    #[error("merge conflict on paths: {}", conflict_paths(.conflicts))]
    Conflict { conflicts: Vec<ConflictEntry> },

    /// No merge (or rebase) is in progress.
    #[error("not merging: no merge or rebase in progress")]
    NotMerging,

    /// No rebase is in progress.
    #[error("not rebasing: no rebase in progress")]
    NotRebasing,

    /// The path is not among the unresolved conflicts.
    #[error("no conflict recorded for {0}")]
    NotConflicted(String),

    /// Conflicts must be resolved before continuing.
    #[error("{0} unresolved conflict(s) remain")]
    ConflictsRemain(usize),

    /// No commit exists at or before the given time.
    #[error("no commit at or before {0}")]
    InvalidDate(DateTime<Utc>),

    /// The working tree or index differs from HEAD.
    #[error("uncommitted changes in the working tree or index")]
    UncommittedChanges,

    #[error("nothing to commit: index matches HEAD")]
    NothingToCommit,

    /// user.name or user.email is missing from the repository config.
    #[error("user.name and user.email must be configured before committing")]
    UnconfiguredUser,

    /// Another merge or rebase must finish first.
    #[error("{0} in progress")]
    OperationInProgress(&'static str),

    /// The branch HEAD is attached to cannot be deleted.
    #[error("cannot delete the checked-out branch {0}")]
    BranchCheckedOut(String),

    /// The operation needs HEAD to be on a branch.
    #[error("HEAD is detached")]
    DetachedHead,

    #[error("no remotes configured")]
    NoRemotes,

    /// A fetch did not finish within the configured time.
    #[error("transfer from {remote} timed out after {secs}s")]
    TransferTimeout { remote: String, secs: u64 },

    /// The remote refused a ref update.
    #[error("push of {reference} rejected: {reason}")]
    PushRejected { reference: String, reason: String },
}

fn conflict_paths(conflicts: &[ConflictEntry]) -> String {
    conflicts.iter().map(|c| c.path.as_str()).collect::<Vec<_>>().join(", ")
}

impl From<git2::Error> for RepoError {
    fn from(e: git2::Error) -> Self {
        RepoError::Storage(StorageError::Git(e))
    }
}

impl From<crate::storage::InvalidNameError> for RepoError {
    fn from(e: crate::storage::InvalidNameError) -> Self {
        RepoError::Storage(StorageError::InvalidName(e))
    }
}

impl RepoError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepoError::Storage(e) if e.is_not_found())
    }

    /// check if this error is a merge conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepoError::Conflict { .. })
    }

    /// the conflicts carried by a `Conflict` error
    pub fn conflicts(&self) -> &[ConflictEntry] {
        match self {
            RepoError::Conflict { conflicts } => conflicts,
            _ => &[],
        }
    }

    /// check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepoError::Storage(e) => e.is_retriable(),
            RepoError::TransferTimeout { .. } => true,
            _ => false,
        }
    }
}
