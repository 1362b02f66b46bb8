//! Branch, tag and HEAD management.
//!
//! Git refs are pointers to commits. This module handles:
//! - local branches under `refs/heads/`
//! - annotated tags under `refs/tags/`
//! - HEAD, which is either attached to a branch (possibly unborn) or
//!   detached at a commit
//! - resolution of reference expressions such as `HEAD~2` or `master^`

use git2::{BranchType, ErrorCode, Repository};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId, GitSignature, TagName};

/// Where HEAD currently points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadState {
    /// on a branch; `commit` is `None` until the branch's first commit
    Attached { branch: BranchName, commit: Option<CommitId> },
    /// at a commit without a branch
    Detached(CommitId),
}

impl HeadState {
    /// the commit HEAD resolves to, if any
    pub fn commit(&self) -> Option<CommitId> {
        match self {
            HeadState::Attached { commit, .. } => *commit,
            HeadState::Detached(id) => Some(*id),
        }
    }

    /// the current branch, if attached
    pub fn branch(&self) -> Option<&BranchName> {
        match self {
            HeadState::Attached { branch, .. } => Some(branch),
            HeadState::Detached(_) => None,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, HeadState::Detached(_))
    }
}

/// An annotated tag.
#[derive(Debug, Clone, PartialEq)]
pub struct TagInfo {
    pub name: TagName,
    pub commit: CommitId,
    pub message: String,
}

/// Manages Git references.
pub struct RefManager;

impl RefManager {
    /// Resolve a branch name to its current commit ID.
    pub fn resolve_branch(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
        let reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        Ok(CommitId::new(commit.id()))
    }

    /// Resolve any reference expression git understands to a commit.
    ///
    /// Branch and tag names, full or abbreviated ids and ancestry suffixes
    /// (`~n`, `^n`) are all accepted.
    pub fn resolve(repo: &Repository, expr: &str) -> StorageResult<CommitId> {
        let invalid = || StorageError::InvalidReference(expr.to_string());
        let object = repo.revparse_single(expr).map_err(|_| invalid())?;
        let commit = object.peel_to_commit().map_err(|_| invalid())?;
        Ok(CommitId::new(commit.id()))
    }

    /// Where HEAD points right now.
    pub fn head_state(repo: &Repository) -> StorageResult<HeadState> {
        let head = repo.find_reference("HEAD")?;
        if let Some(target) = head.symbolic_target() {
            let name = target.strip_prefix("refs/heads/").unwrap_or(target);
            let branch = BranchName::new(name)?;
            let commit = match repo.find_reference(target) {
                Ok(reference) => Some(CommitId::new(reference.peel_to_commit()?.id())),
                Err(e) if e.code() == ErrorCode::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            return Ok(HeadState::Attached { branch, commit });
        }
        let commit = head.peel_to_commit()?;
        Ok(HeadState::Detached(CommitId::new(commit.id())))
    }

    /// Get the current HEAD commit, `None` on an unborn branch.
    pub fn head_commit(repo: &Repository) -> StorageResult<Option<CommitId>> {
        Ok(Self::head_state(repo)?.commit())
    }

    /// Point HEAD at a branch.
    pub fn attach_head(repo: &Repository, branch: &BranchName) -> StorageResult<()> {
        repo.set_head(&branch.as_ref_path())?;
        Ok(())
    }

    /// Point HEAD directly at a commit.
    pub fn detach_head(repo: &Repository, commit: CommitId) -> StorageResult<()> {
        repo.set_head_detached(commit.raw())?;
        Ok(())
    }

    /// Move whatever HEAD points at to `commit`.
    ///
    /// On a branch the branch ref moves (and is created if unborn);
    /// detached HEAD moves itself.
    pub fn advance_head(repo: &Repository, commit: CommitId, reason: &str) -> StorageResult<()> {
        match Self::head_state(repo)? {
            HeadState::Attached { branch, .. } => {
                repo.reference(&branch.as_ref_path(), commit.raw(), true, reason)?;
            }
            HeadState::Detached(_) => Self::detach_head(repo, commit)?,
        }
        Ok(())
    }

    /// Check if a branch exists.
    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    /// Create a new branch pointing to the given commit.
    pub fn create_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        if Self::branch_exists(repo, branch) {
            return Err(StorageError::BranchAlreadyExists(branch.to_string()));
        }

        let commit = repo.find_commit(target.raw())?;
        repo.branch(branch.as_str(), &commit, false)?;

        Ok(())
    }

    /// Update a branch to point to a new commit, creating it if needed.
    pub fn update_branch(repo: &Repository, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        repo.reference(
            &branch.as_ref_path(),
            target.raw(),
            true,
            &format!("update branch to {}", target.short()),
        )?;

        Ok(())
    }

    /// Delete a branch.
    pub fn delete_branch(repo: &Repository, branch: &BranchName) -> StorageResult<()> {
        let mut git_branch = repo
            .find_branch(branch.as_str(), BranchType::Local)
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;

        git_branch.delete()?;

        Ok(())
    }

    /// List all local branches with the commit they point at.
    pub fn list_branches(repo: &Repository) -> StorageResult<Vec<(BranchName, CommitId)>> {
        let branches = repo.branches(Some(BranchType::Local))?;

        let mut result = Vec::new();
        for branch_result in branches {
            let (branch, _) = branch_result?;
            let Some(name) = branch.name()? else { continue };
            let Ok(branch_name) = BranchName::new(name) else { continue };
            let commit = branch.get().peel_to_commit()?;
            result.push((branch_name, CommitId::new(commit.id())));
        }
        result.sort();

        Ok(result)
    }

    /// Create an annotated tag.
    pub fn create_tag(
        repo: &Repository,
        name: &TagName,
        target: CommitId,
        message: &str,
        tagger: &GitSignature,
    ) -> StorageResult<TagInfo> {
        if repo.find_reference(&name.as_ref_path()).is_ok() {
            return Err(StorageError::TagAlreadyExists(name.to_string()));
        }

        let commit = repo
            .find_commit(target.raw())
            .map_err(|_| StorageError::CommitNotFound(target.to_string()))?;
        let sig = tagger.to_git2_signature()?;
        repo.tag(name.as_str(), commit.as_object(), &sig, message, false)?;

        Ok(TagInfo {
            name: name.clone(),
            commit: target,
            message: message.to_string(),
        })
    }

    /// Delete a tag.
    pub fn delete_tag(repo: &Repository, name: &TagName) -> StorageResult<()> {
        repo.tag_delete(name.as_str()).map_err(|e| {
            if e.code() == ErrorCode::NotFound {
                StorageError::RefNotFound(name.to_string())
            } else {
                StorageError::Git(e)
            }
        })
    }

    /// List all tags, sorted by name.
    pub fn list_tags(repo: &Repository) -> StorageResult<Vec<TagInfo>> {
        let names = repo.tag_names(None)?;

        let mut result = Vec::new();
        for name in names.iter().flatten() {
            let Ok(tag_name) = TagName::new(name) else { continue };
            let reference = repo.find_reference(&tag_name.as_ref_path())?;
            let commit = reference.peel_to_commit()?;
            let message = match reference.peel_to_tag() {
                Ok(tag) => tag.message().unwrap_or("").to_string(),
                // lightweight tags created by other tools carry no message
                Err(_) => String::new(),
            };
            result.push(TagInfo {
                name: tag_name,
                commit: CommitId::new(commit.id()),
                message,
            });
        }
        result.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::commit::CommitBuilder;
    use crate::storage::tree::empty_tree;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        repo.set_head("refs/heads/master").unwrap();
        (dir, repo)
    }

    fn sig() -> GitSignature {
        GitSignature::new("Tester", "tester@example.com")
    }

    fn commit(repo: &Repository, parents: Vec<CommitId>, message: &str) -> CommitId {
        let tree = empty_tree(repo).unwrap();
        CommitBuilder::new(repo)
            .tree(tree)
            .parents(parents)
            .message(message)
            .signature(sig())
            .commit()
            .unwrap()
    }

    #[test]
    fn test_unborn_head() {
        let (_dir, repo) = setup_repo();
        let state = RefManager::head_state(&repo).unwrap();
        assert_eq!(
            state,
            HeadState::Attached {
                branch: BranchName::master(),
                commit: None
            }
        );
        assert_eq!(RefManager::head_commit(&repo).unwrap(), None);
    }

    #[test]
    fn test_advance_head_creates_branch() {
        let (_dir, repo) = setup_repo();
        let first = commit(&repo, vec![], "first");
        RefManager::advance_head(&repo, first, "commit").unwrap();

        assert_eq!(RefManager::head_commit(&repo).unwrap(), Some(first));
        assert_eq!(RefManager::resolve_branch(&repo, &BranchName::master()).unwrap(), first);
    }

    #[test]
    fn test_detached_head() {
        let (_dir, repo) = setup_repo();
        let first = commit(&repo, vec![], "first");
        let second = commit(&repo, vec![first], "second");
        RefManager::advance_head(&repo, second, "commit").unwrap();

        RefManager::detach_head(&repo, first).unwrap();
        assert_eq!(RefManager::head_state(&repo).unwrap(), HeadState::Detached(first));

        // moving a detached HEAD leaves branches alone
        RefManager::advance_head(&repo, second, "move").unwrap();
        assert!(RefManager::head_state(&repo).unwrap().is_detached());
        assert_eq!(RefManager::resolve_branch(&repo, &BranchName::master()).unwrap(), second);
    }

    #[test]
    fn test_resolve_expressions() {
        let (_dir, repo) = setup_repo();
        let first = commit(&repo, vec![], "first");
        let second = commit(&repo, vec![first], "second");
        RefManager::advance_head(&repo, second, "commit").unwrap();

        assert_eq!(RefManager::resolve(&repo, "HEAD").unwrap(), second);
        assert_eq!(RefManager::resolve(&repo, "HEAD~1").unwrap(), first);
        assert_eq!(RefManager::resolve(&repo, "master^").unwrap(), first);
        assert_eq!(RefManager::resolve(&repo, &first.to_string()).unwrap(), first);
        assert!(matches!(
            RefManager::resolve(&repo, "nosuchref"),
            Err(StorageError::InvalidReference(_))
        ));
        assert!(matches!(
            RefManager::resolve(&repo, "HEAD~5"),
            Err(StorageError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_branch_lifecycle() {
        let (_dir, repo) = setup_repo();
        let first = commit(&repo, vec![], "first");
        RefManager::advance_head(&repo, first, "commit").unwrap();

        let topic = BranchName::new("topic").unwrap();
        RefManager::create_branch(&repo, &topic, first).unwrap();
        assert!(matches!(
            RefManager::create_branch(&repo, &topic, first),
            Err(StorageError::BranchAlreadyExists(_))
        ));

        let names: Vec<_> = RefManager::list_branches(&repo)
            .unwrap()
            .into_iter()
            .map(|(b, _)| b.to_string())
            .collect();
        assert_eq!(names, vec!["master", "topic"]);

        RefManager::delete_branch(&repo, &topic).unwrap();
        assert!(!RefManager::branch_exists(&repo, &topic));
        assert!(RefManager::delete_branch(&repo, &topic).unwrap_err().is_not_found());
    }

    #[test]
    fn test_tags() {
        let (_dir, repo) = setup_repo();
        let first = commit(&repo, vec![], "first");
        let tag = TagName::new("v1.0").unwrap();

        RefManager::create_tag(&repo, &tag, first, "release", &sig()).unwrap();
        assert!(matches!(
            RefManager::create_tag(&repo, &tag, first, "again", &sig()),
            Err(StorageError::TagAlreadyExists(_))
        ));

        let tags = RefManager::list_tags(&repo).unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].commit, first);
        assert_eq!(tags[0].message.trim_end(), "release");
        assert_eq!(RefManager::resolve(&repo, "v1.0").unwrap(), first);

        RefManager::delete_tag(&repo, &tag).unwrap();
        assert!(RefManager::list_tags(&repo).unwrap().is_empty());
    }
}
