//! Commit creation and history traversal
//!
//! commits are the snapshots users see in the log. This module handles
//! commit creation, ancestry questions and history walking.

use chrono::{DateTime, FixedOffset, Offset, Utc};
use git2::{Repository, Revwalk, Sort};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::tree::TreeHandle;
use crate::storage::types::{CommitId, GitSignature, TreeId};

/// convert a git timestamp, keeping its timezone offset
pub(crate) fn to_datetime(time: git2::Time) -> DateTime<FixedOffset> {
    let offset = FixedOffset::east_opt(time.offset_minutes() * 60).unwrap_or_else(|| Utc.fix());
    DateTime::from_timestamp(time.seconds(), 0)
        .unwrap_or_default()
        .with_timezone(&offset)
}

/// convert back to a git timestamp
pub(crate) fn to_git_time(time: &DateTime<FixedOffset>) -> git2::Time {
    git2::Time::new(time.timestamp(), time.offset().local_minus_utc() / 60)
}

/// information about a commit
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub author_time: DateTime<FixedOffset>,
    pub committer_name: String,
    pub committer_email: String,
    pub commit_time: DateTime<FixedOffset>,
}

impl CommitInfo {
    /// create CommitInfo from a git2::Commit
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let committer = commit.committer();

        Self {
            id: CommitId::new(commit.id()),
            tree_id: TreeId::new(commit.tree_id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("Unknown").to_string(),
            author_email: author.email().unwrap_or("unknown@unknown").to_string(),
            author_time: to_datetime(author.when()),
            committer_name: committer.name().unwrap_or("Unknown").to_string(),
            committer_email: committer.email().unwrap_or("unknown@unknown").to_string(),
            commit_time: to_datetime(committer.when()),
        }
    }

    /// check if this is a merge commit (has multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() > 1
    }

    /// get the first (or only) parent
    pub fn first_parent(&self) -> Option<CommitId> {
        self.parent_ids.first().copied()
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }

    /// the author as a signature, for replaying the commit elsewhere
    pub fn author(&self) -> GitSignature {
        GitSignature::new(&self.author_name, &self.author_email)
    }
}

/// builder for creating commits with a fluent interface
///
/// the builder never moves refs; callers decide which ref advances.
pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree_id: Option<TreeId>,
    parents: Vec<CommitId>,
    message: String,
    committer: Option<GitSignature>,
    author: Option<(GitSignature, Option<DateTime<FixedOffset>>)>,
}

impl<'a> CommitBuilder<'a> {
    /// create a new CommitBuilder
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree_id: None,
            parents: Vec::new(),
            message: String::new(),
            committer: None,
            author: None,
        }
    }

    /// set the tree for this commit
    pub fn tree(mut self, tree_id: TreeId) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    /// add a parent commit
    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    /// set multiple parents (for merge commits)
    pub fn parents(mut self, parents: Vec<CommitId>) -> Self {
        self.parents = parents;
        self
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// set the committer (also the author unless `author` is called)
    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.committer = Some(signature);
        self
    }

    /// keep an existing authorship, optionally with its original time
    pub fn author(mut self, author: GitSignature, time: Option<DateTime<FixedOffset>>) -> Self {
        self.author = Some((author, time));
        self
    }

    /// create the commit and return its ID
    pub fn commit(self) -> StorageResult<CommitId> {
        let tree_id = self
            .tree_id
            .ok_or_else(|| StorageError::Internal("commit requires a tree".to_string()))?;
        let committer = self
            .committer
            .ok_or_else(|| StorageError::Internal("commit requires a signature".to_string()))?;

        let tree = self.repo.find_tree(tree_id.raw())?;
        let committer_sig = committer.to_git2_signature()?;
        let author_sig = match &self.author {
            Some((author, Some(time))) => author.to_git2_signature_at(&to_git_time(time))?,
            Some((author, None)) => author.to_git2_signature()?,
            None => committer_sig.clone(),
        };

        // collect parent commits
        let parent_commits: Vec<git2::Commit<'_>> = self
            .parents
            .iter()
            .map(|id| {
                self.repo
                    .find_commit(id.raw())
                    .map_err(|_| StorageError::CommitNotFound(id.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();

        let oid = self.repo.commit(
            None,
            &author_sig,
            &committer_sig,
            &self.message,
            &tree,
            &parent_refs,
        )?;

        Ok(CommitId::new(oid))
    }
}

/// get information about a commit
pub fn get_commit(repo: &Repository, id: CommitId) -> StorageResult<CommitInfo> {
    let commit = repo
        .find_commit(id.raw())
        .map_err(|_| StorageError::CommitNotFound(id.to_string()))?;

    Ok(CommitInfo::from_git2(&commit))
}

/// get the tree snapshot at a specific commit
pub fn get_tree_at_commit(repo: &Repository, commit_id: CommitId) -> StorageResult<TreeHandle<'_>> {
    let commit = repo
        .find_commit(commit_id.raw())
        .map_err(|_| StorageError::CommitNotFound(commit_id.to_string()))?;

    let tree = commit.tree()?;
    Ok(TreeHandle::new(tree))
}

/// find the merge base (common ancestor) of two commits
///
/// returns None if there is no common ancestor
pub fn find_merge_base(repo: &Repository, a: CommitId, b: CommitId) -> StorageResult<Option<CommitId>> {
    match repo.merge_base(a.raw(), b.raw()) {
        Ok(oid) => Ok(Some(CommitId::new(oid))),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(StorageError::Git(e)),
    }
}

/// true if `ancestor` is reachable from `commit` (or is the same commit)
pub fn is_ancestor(repo: &Repository, ancestor: CommitId, commit: CommitId) -> StorageResult<bool> {
    if ancestor == commit {
        return Ok(true);
    }
    Ok(repo.graph_descendant_of(commit.raw(), ancestor.raw())?)
}

/// commits reachable from `tip` but not from `upstream`, oldest first,
/// merge commits left out
///
/// this is the list of commits a rebase replays.
pub fn commits_to_replay(repo: &Repository, tip: CommitId, upstream: CommitId) -> StorageResult<Vec<CommitId>> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push(tip.raw())?;
    revwalk.hide(upstream.raw())?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

    let mut result = Vec::new();
    for oid in revwalk {
        let commit = repo.find_commit(oid?)?;
        if commit.parent_count() <= 1 {
            result.push(CommitId::new(commit.id()));
        }
    }
    Ok(result)
}

/// iterate over commit history starting from a commit
pub struct HistoryIterator<'repo> {
    repo: &'repo Repository,
    revwalk: Revwalk<'repo>,
}

impl<'repo> HistoryIterator<'repo> {
    /// create a new history iterator
    pub fn new(repo: &'repo Repository, start: CommitId) -> StorageResult<Self> {
        let mut revwalk = repo.revwalk()?;
        revwalk.push(start.raw())?;
        revwalk.set_sorting(Sort::TIME | Sort::TOPOLOGICAL)?;

        Ok(Self { repo, revwalk })
    }

    /// stop at `commit` and everything reachable from it
    pub fn hide(mut self, commit: CommitId) -> StorageResult<Self> {
        self.revwalk.hide(commit.raw())?;
        Ok(self)
    }

    /// only follow first parents (linear history through merges)
    pub fn first_parent_only(mut self) -> Self {
        self.revwalk.simplify_first_parent().ok();
        self
    }
}

impl<'repo> Iterator for HistoryIterator<'repo> {
    type Item = StorageResult<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.revwalk.next()? {
            Ok(oid) => match self.repo.find_commit(oid) {
                Ok(commit) => Some(Ok(CommitInfo::from_git2(&commit))),
                Err(e) => Some(Err(StorageError::Git(e))),
            },
            Err(e) => Some(Err(StorageError::Git(e))),
        }
    }
}

/// get history for a commit
pub fn history(repo: &Repository, start: CommitId) -> StorageResult<HistoryIterator<'_>> {
    HistoryIterator::new(repo, start)
}

/// default messages for commits the engine writes on its own
pub struct CommitMessage;

impl CommitMessage {
    /// message for merging a branch or commit into HEAD
    pub fn merge(target: &str) -> String {
        format!("Merge branch '{}'", target)
    }

    /// message for merging a fetched remote branch
    pub fn merge_remote(remote: &str, branch: &str) -> String {
        format!("Merge branch '{}' of {}", branch, remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tree::empty_tree;
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
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
    fn test_commit_builder() {
        let (_dir, repo) = setup_repo();
        let first = commit(&repo, vec![], "first");
        let second = commit(&repo, vec![first], "second\n\nbody");

        let info = get_commit(&repo, second).unwrap();
        assert_eq!(info.parent_ids, vec![first]);
        assert_eq!(info.summary(), "second");
        assert_eq!(info.author_name, "Tester");
        assert_eq!(info.committer_email, "tester@example.com");
        assert!(!info.is_merge());
    }

    #[test]
    fn test_builder_requires_signature() {
        let (_dir, repo) = setup_repo();
        let tree = empty_tree(&repo).unwrap();
        let result = CommitBuilder::new(&repo).tree(tree).message("x").commit();
        assert!(matches!(result, Err(StorageError::Internal(_))));
    }

    #[test]
    fn test_author_time_is_preserved() {
        let (_dir, repo) = setup_repo();
        let tree = empty_tree(&repo).unwrap();
        let when = DateTime::parse_from_rfc3339("2019-03-04T05:06:07+01:00").unwrap();
        let id = CommitBuilder::new(&repo)
            .tree(tree)
            .message("replayed")
            .signature(sig())
            .author(GitSignature::new("Original", "orig@example.com"), Some(when))
            .commit()
            .unwrap();

        let info = get_commit(&repo, id).unwrap();
        assert_eq!(info.author_name, "Original");
        assert_eq!(info.author_time, when);
        assert_eq!(info.author_time.offset().local_minus_utc(), 3600);
        assert_eq!(info.committer_name, "Tester");
    }

    #[test]
    fn test_ancestry() {
        let (_dir, repo) = setup_repo();
        let root = commit(&repo, vec![], "root");
        let left = commit(&repo, vec![root], "left");
        let right = commit(&repo, vec![root], "right");
        let merge = commit(&repo, vec![left, right], "merge");

        assert_eq!(find_merge_base(&repo, left, right).unwrap(), Some(root));
        assert!(is_ancestor(&repo, root, merge).unwrap());
        assert!(is_ancestor(&repo, left, left).unwrap());
        assert!(!is_ancestor(&repo, left, right).unwrap());

        let unrelated = commit(&repo, vec![], "unrelated");
        assert_eq!(find_merge_base(&repo, unrelated, left).unwrap(), None);
    }

    #[test]
    fn test_history_and_replay_list() {
        let (_dir, repo) = setup_repo();
        let root = commit(&repo, vec![], "root");
        let a = commit(&repo, vec![root], "a");
        let b = commit(&repo, vec![a], "b");
        let side = commit(&repo, vec![root], "side");
        let merge = commit(&repo, vec![b, side], "merge");

        let all: Vec<_> = history(&repo, merge).unwrap().map(|c| c.unwrap().id).collect();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0], merge);
        assert_eq!(*all.last().unwrap(), root);

        let first_parent: Vec<_> = history(&repo, merge)
            .unwrap()
            .first_parent_only()
            .map(|c| c.unwrap().id)
            .collect();
        assert_eq!(first_parent, vec![merge, b, a, root]);

        let since: Vec<_> = history(&repo, b).unwrap().hide(root).unwrap().map(|c| c.unwrap().id).collect();
        assert_eq!(since, vec![b, a]);

        assert_eq!(commits_to_replay(&repo, merge, side).unwrap(), vec![a, b]);
    }
}
