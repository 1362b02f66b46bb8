//! Storage layer error types
//!
//! All errors that can occur while reading or writing the object store are
//! defined here. Higher layers wrap them in their own error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::storage::types::InvalidNameError;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// no feature at the given path
    #[error("feature not found: {0}")]
    FeatureNotFound(String),

    /// no tree at the given path
    #[error("tree not found: {0}")]
    TreeNotFound(String),

    /// the requested object id is not in the store
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// the specified branch/ref was not found
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// a reference expression could not be resolved to a commit
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// no remote with that name is configured
    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    /// branch already exists
    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// tag already exists
    #[error("tag already exists: {0}")]
    TagAlreadyExists(String),

    /// remote already exists
    #[error("remote already exists: {0}")]
    RemoteAlreadyExists(String),

    /// a repository is already initialized at that location
    #[error("repository already exists: {0}")]
    RepositoryAlreadyExists(PathBuf),

    /// repo is not initialized
    #[error("not a repository: {0}")]
    NotARepository(PathBuf),

    /// the repository lock could not be acquired in time
    #[error("repository is busy: lock not acquired within {0:?}")]
    RepositoryBusy(Duration),

    /// invalid branch, tag or node name
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// data integrity check failed
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: String, reason: String },

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// the tree entry has an unexpected type
    #[error("unexpected entry type at {path}: expected {expected}, found {found}")]
    UnexpectedEntryType {
        path: String,
        expected: String,
        found: String,
    },

    /// the feature data doesn't match its declared types
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::FeatureNotFound(_)
                | StorageError::TreeNotFound(_)
                | StorageError::ObjectNotFound(_)
                | StorageError::RefNotFound(_)
                | StorageError::CommitNotFound(_)
                | StorageError::RemoteNotFound(_)
        )
    }

    /// check if this error is caused by a name already being taken
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            StorageError::BranchAlreadyExists(_)
                | StorageError::TagAlreadyExists(_)
                | StorageError::RemoteAlreadyExists(_)
                | StorageError::RepositoryAlreadyExists(_)
        )
    }

    /// check if this error is recoverable by retry
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::RepositoryBusy(_))
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let not_found = StorageError::FeatureNotFound("parks/1".into());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_already_exists());

        let exists = StorageError::BranchAlreadyExists("master".into());
        assert!(!exists.is_not_found());
        assert!(exists.is_already_exists());

        let busy = StorageError::RepositoryBusy(Duration::from_millis(10));
        assert!(busy.is_retriable());
        assert!(!not_found.is_retriable());
    }

    #[test]
    fn test_invalid_name_converts() {
        let err: StorageError = InvalidNameError::Empty.into();
        assert!(matches!(err, StorageError::InvalidName(InvalidNameError::Empty)));
    }
}
