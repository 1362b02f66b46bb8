//! Repository facade.
//!
//! [`Repository`] is the entry point: it owns the store, the workspace
//! record and the diff cache, and exposes every versioning operation.

mod api;
mod config;
mod error;
mod history;
mod inspect;
mod ops;
mod remote;
mod workspace;

pub use api::Repository;
pub use config::{RepositoryConfig, USER_EMAIL, USER_NAME};
pub use error::{RepoError, RepoResult};
pub use history::LogOptions;
pub use ops::{MergeOptions, MergeOutcome, RebaseOutcome};
pub use remote::PullOutcome;

pub use crate::storage::ResetMode;

/// the current commit
pub const HEAD: &str = "HEAD";
/// the working tree
pub const WORK_HEAD: &str = "WORK_HEAD";
/// the index
pub const STAGE_HEAD: &str = "STAGE_HEAD";
/// default remote name
pub const ORIGIN: &str = "origin";

#[cfg(test)]
pub(crate) mod test_support {
    use tempfile::TempDir;

    use super::{Repository, USER_EMAIL, USER_NAME};
    use crate::storage::Feature;

    /// a fresh repository with a committer configured
    pub(crate) fn repo_with_user() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.set_config(USER_NAME, "Tester").unwrap();
        repo.set_config(USER_EMAIL, "tester@example.com").unwrap();
        (dir, repo)
    }

    pub(crate) fn park(name: &str, area: f64) -> Feature {
        Feature::new().with("name", name).with("area", area)
    }
}
