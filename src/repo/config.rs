//! Repository configuration.
//!
//! Two kinds of settings live here: how the repository is opened
//! ([`RepositoryConfig`], chosen by the embedding program) and the
//! key/value settings stored in the repository itself (`user.name` and
//! friends), read and written through git's config file.

use std::path::PathBuf;
use std::time::Duration;

use git2::{ConfigLevel, ErrorCode, Repository};

use crate::repo::error::{RepoError, RepoResult};
use crate::storage::{GitSignature, StorageError};

/// key of the committer name
pub const USER_NAME: &str = "user.name";
/// key of the committer email
pub const USER_EMAIL: &str = "user.email";

/// Options for opening a repository.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Directory the repository lives in (its store is `<path>/.geogig`).
    pub path: PathBuf,
    /// Initialize a new repository if none exists.
    pub create_if_missing: bool,
    /// How long to wait for the repository lock.
    pub lock_timeout: Duration,
    /// Upper bound for a single fetch from a remote.
    pub transfer_timeout: Duration,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            create_if_missing: false,
            lock_timeout: Duration::from_secs(5),
            transfer_timeout: Duration::from_secs(60),
        }
    }
}

impl RepositoryConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Set the lock timeout.
    pub fn lock_timeout(mut self, value: Duration) -> Self {
        self.lock_timeout = value;
        self
    }

    /// Set the transfer timeout.
    pub fn transfer_timeout(mut self, value: Duration) -> Self {
        self.transfer_timeout = value;
        self
    }
}

/// the repository-local config file (global settings are not consulted)
fn local_config(repo: &Repository) -> RepoResult<git2::Config> {
    Ok(repo.config()?.open_level(ConfigLevel::Local)?)
}

/// read a repository-local setting
pub(crate) fn get(repo: &Repository, key: &str) -> RepoResult<Option<String>> {
    match local_config(repo)?.get_string(key) {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// write a repository-local setting
pub(crate) fn set(repo: &Repository, key: &str, value: &str) -> RepoResult<()> {
    if key.is_empty() || !key.contains('.') {
        return Err(StorageError::InvalidName(crate::storage::InvalidNameError::InvalidPath(key.to_string())).into());
    }
    local_config(repo)?.set_str(key, value)?;
    Ok(())
}

/// the configured committer
pub(crate) fn signature(repo: &Repository) -> RepoResult<GitSignature> {
    match (get(repo, USER_NAME)?, get(repo, USER_EMAIL)?) {
        (Some(name), Some(email)) if !name.is_empty() && !email.is_empty() => Ok(GitSignature::new(name, email)),
        _ => Err(RepoError::UnconfiguredUser),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder() {
        let config = RepositoryConfig::new("/tmp/repo")
            .create_if_missing(true)
            .lock_timeout(Duration::from_millis(10));
        assert!(config.create_if_missing);
        assert_eq!(config.lock_timeout, Duration::from_millis(10));
        assert_eq!(config.transfer_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_local_settings() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();

        assert_eq!(get(&repo, USER_NAME).unwrap(), None);
        assert!(matches!(signature(&repo), Err(RepoError::UnconfiguredUser)));

        set(&repo, USER_NAME, "Ann").unwrap();
        set(&repo, USER_EMAIL, "ann@example.com").unwrap();
        assert_eq!(get(&repo, USER_NAME).unwrap().as_deref(), Some("Ann"));
        assert_eq!(signature(&repo).unwrap(), GitSignature::new("Ann", "ann@example.com"));

        assert!(set(&repo, "nodot", "x").is_err());
    }
}
