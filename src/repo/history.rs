//! Commit history queries: log, point-in-time lookup, versions and blame.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::blame::{self, BlameEntry};
use crate::repo::api::{Repository, Session};
use crate::repo::error::{RepoError, RepoResult};
use crate::repo::HEAD;
use crate::storage::{
    find_merge_base, get_feature, CommitId, CommitInfo, Feature, HistoryIterator, Node, NodePath, StorageResult,
};

/// Filters for [`Repository::log_with`].
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// stop at this commit (exclusive) and everything behind it
    pub since_commit: Option<String>,
    /// only commits made at or after this time
    pub since: Option<DateTime<Utc>>,
    /// only commits made at or before this time
    pub until: Option<DateTime<Utc>>,
    /// only commits that changed this path relative to their first parent
    pub path: Option<String>,
    pub limit: Option<usize>,
    /// follow first parents only
    pub first_parent: bool,
}

impl LogOptions {
    pub fn since_commit(mut self, rev: impl Into<String>) -> Self {
        self.since_commit = Some(rev.into());
        self
    }

    pub fn since(mut self, time: DateTime<Utc>) -> Self {
        self.since = Some(time);
        self
    }

    pub fn until(mut self, time: DateTime<Utc>) -> Self {
        self.until = Some(time);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn first_parent(mut self, value: bool) -> Self {
        self.first_parent = value;
        self
    }
}

impl Repository {
    /// History reachable from `start`, newest first.
    ///
    /// An unborn HEAD has no history and yields an empty list.
    pub fn log(&self, start: &str, limit: Option<usize>) -> RepoResult<Vec<CommitInfo>> {
        self.log_with(
            start,
            LogOptions {
                limit,
                ..Default::default()
            },
        )
    }

    /// History reachable from `start`, filtered.
    pub fn log_with(&self, start: &str, options: LogOptions) -> RepoResult<Vec<CommitInfo>> {
        let path = options.path.as_deref().map(NodePath::new).transpose()?;
        self.read(|s| s.log(start, &options, path.as_ref()))
    }

    /// The newest commit reachable from HEAD made at or before `time`.
    pub fn commit_at(&self, time: DateTime<Utc>) -> RepoResult<CommitInfo> {
        self.read(|s| {
            let Some(head) = s.head_commit()? else {
                return Err(RepoError::InvalidDate(time));
            };
            let mut best: Option<CommitInfo> = None;
            for info in HistoryIterator::new(s.repo, head)? {
                let info = info?;
                if info.commit_time > time {
                    continue;
                }
                if best.as_ref().map_or(true, |b| info.commit_time > b.commit_time) {
                    best = Some(info);
                }
            }
            best.ok_or(RepoError::InvalidDate(time))
        })
    }

    /// The merge base of two commits, if they share history.
    pub fn common_ancestor(&self, a: &str, b: &str) -> RepoResult<Option<CommitId>> {
        self.read(|s| {
            let a = s.resolve(a)?;
            let b = s.resolve(b)?;
            Ok(find_merge_base(s.repo, a, b)?)
        })
    }

    /// Every version of the feature at `path` in HEAD's history, newest
    /// first, paired with the commit that produced it.
    pub fn versions(&self, path: &str) -> RepoResult<Vec<(CommitInfo, Feature)>> {
        let path = NodePath::new(path)?;
        self.read(|s| {
            let Some(head) = s.head_commit()? else {
                return Ok(Vec::new());
            };
            let mut result = Vec::new();
            for info in HistoryIterator::new(s.repo, head)? {
                let info = info?;
                let Some(Node::Feature { id, .. }) = s.commit_tree(info.id)?.entry_at(&path)? else {
                    continue;
                };
                let before = match info.first_parent() {
                    Some(parent) => s.commit_tree(parent)?.entry_at(&path)?,
                    None => None,
                };
                if !matches!(before, Some(Node::Feature { id: old, .. }) if old == id) {
                    result.push((info, get_feature(s.repo, id)?));
                }
            }
            Ok(result)
        })
    }

    /// Who last changed each attribute of the feature at `path`.
    pub fn blame(&self, path: &str) -> RepoResult<IndexMap<String, BlameEntry>> {
        let path = NodePath::new(path)?;
        self.read(|s| {
            let head = s.require_head()?;
            Ok(blame::blame(s.repo, head, &path)?)
        })
    }
}

impl Session<'_> {
    fn log(&self, start: &str, options: &LogOptions, path: Option<&NodePath>) -> RepoResult<Vec<CommitInfo>> {
        let start = match start {
            HEAD => match self.head_commit()? {
                Some(id) => id,
                None => return Ok(Vec::new()),
            },
            rev => self.resolve(rev)?,
        };

        let mut walk = HistoryIterator::new(self.repo, start)?;
        if let Some(rev) = &options.since_commit {
            walk = walk.hide(self.resolve(rev)?)?;
        }
        if options.first_parent {
            walk = walk.first_parent_only();
        }

        let mut result = Vec::new();
        for info in walk {
            if options.limit.is_some_and(|limit| result.len() >= limit) {
                break;
            }
            let info = info?;
            if options.since.is_some_and(|since| info.commit_time < since) {
                continue;
            }
            if options.until.is_some_and(|until| info.commit_time > until) {
                continue;
            }
            if let Some(path) = path {
                if !self.touches(&info, path)? {
                    continue;
                }
            }
            result.push(info);
        }
        Ok(result)
    }

    /// true if `path` differs between a commit and its first parent
    fn touches(&self, info: &CommitInfo, path: &NodePath) -> StorageResult<bool> {
        let here = self.entry_id(info.id, path)?;
        let before = match info.first_parent() {
            Some(parent) => self.entry_id(parent, path)?,
            None => None,
        };
        Ok(here != before)
    }

    fn entry_id(&self, commit: CommitId, path: &NodePath) -> StorageResult<Option<git2::Oid>> {
        let tree = crate::storage::get_tree_at_commit(self.repo, commit)?;
        Ok(tree.entry_at(path)?.map(|node| match node {
            Node::Tree { id, .. } => id.raw(),
            Node::Feature { id, .. } => id.raw(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::repo::test_support::{park, repo_with_user};
    use crate::repo::{LogOptions, RepoError};

    #[test]
    fn test_log_on_empty_repository() {
        let (_dir, repo) = repo_with_user();
        assert!(repo.log("HEAD", None).unwrap().is_empty());
        assert!(repo.versions("parks/1").unwrap().is_empty());
    }

    #[test]
    fn test_log_filters() {
        let (_dir, repo) = repo_with_user();
        repo.insert_feature("parks/1", park("a", 1.0)).unwrap();
        let first = repo.add_and_commit("one").unwrap();
        repo.insert_feature("roads/1", park("r", 1.0)).unwrap();
        repo.add_and_commit("two").unwrap();
        repo.insert_feature("parks/1", park("a", 2.0)).unwrap();
        repo.add_and_commit("three").unwrap();

        assert_eq!(repo.log("HEAD", None).unwrap().len(), 3);
        assert_eq!(repo.log("HEAD", Some(2)).unwrap().len(), 2);

        let since = repo
            .log_with("HEAD", LogOptions::default().since_commit(first.id.to_string()))
            .unwrap();
        assert_eq!(since.len(), 2);

        let parks = repo.log_with("HEAD", LogOptions::default().path("parks")).unwrap();
        let messages: Vec<_> = parks.iter().map(|c| c.message.as_str()).collect();
        assert_eq!(messages, vec!["three", "one"]);

        let future = Utc::now() + Duration::days(1);
        assert!(repo.log_with("HEAD", LogOptions::default().since(future)).unwrap().is_empty());
    }

    #[test]
    fn test_commit_at() {
        let (_dir, repo) = repo_with_user();
        let long_ago = Utc::now() - Duration::days(365);
        assert!(matches!(repo.commit_at(long_ago), Err(RepoError::InvalidDate(_))));

        repo.insert_feature("parks/1", park("a", 1.0)).unwrap();
        let commit = repo.add_and_commit("one").unwrap();
        assert_eq!(repo.commit_at(Utc::now() + Duration::seconds(5)).unwrap().id, commit.id);
        assert!(matches!(repo.commit_at(long_ago), Err(RepoError::InvalidDate(_))));
    }

    #[test]
    fn test_versions_and_blame() {
        let (_dir, repo) = repo_with_user();
        repo.insert_feature("parks/1", park("a", 1.0)).unwrap();
        repo.add_and_commit("one").unwrap();
        repo.insert_feature("roads/1", park("r", 1.0)).unwrap();
        repo.add_and_commit("two").unwrap();
        repo.insert_feature("parks/1", park("a", 2.0)).unwrap();
        let third = repo.add_and_commit("three").unwrap();

        let versions = repo.versions("parks/1").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].0.id, third.id);

        let blame = repo.blame("parks/1").unwrap();
        assert_eq!(blame.len(), 2);
        assert_eq!(blame["area"].commit, third.id);
        assert_ne!(blame["name"].commit, third.id);
        assert_eq!(blame["name"].author, "Tester");
    }

    #[test]
    fn test_common_ancestor() {
        let (_dir, repo) = repo_with_user();
        repo.insert_feature("parks/1", park("a", 1.0)).unwrap();
        let base = repo.add_and_commit("base").unwrap();
        repo.create_branch("side", "HEAD", false).unwrap();
        repo.insert_feature("parks/2", park("b", 1.0)).unwrap();
        repo.add_and_commit("main work").unwrap();

        assert_eq!(repo.common_ancestor("master", "side").unwrap(), Some(base.id));
    }
}
