//! Read-only views of snapshots: features, layers, diffs and `show`.
//!
//! Every call takes a revision. Besides commit expressions, `WORK_HEAD`
//! and `STAGE_HEAD` name the working tree and the index.

use std::collections::BTreeMap;
use std::fmt::Write;

use indexmap::IndexMap;

use crate::diff::{attribute_diff, tree_stats, AttributeChange, DiffEntry, TreeStats};
use crate::repo::api::{Repository, Session};
use crate::repo::error::RepoResult;
use crate::repo::{HEAD, STAGE_HEAD, WORK_HEAD};
use crate::storage::{
    get_commit, get_feature, CommitInfo, Feature, FeatureType, Node, NodePath, StorageError, TreeHandle,
};

fn optional_path(path: Option<&str>) -> RepoResult<Option<NodePath>> {
    Ok(path.map(NodePath::new).transpose()?)
}

impl Repository {
    /// The feature at `path` in `rev`.
    pub fn feature(&self, rev: &str, path: &str) -> RepoResult<Feature> {
        let path = NodePath::new(path)?;
        self.read(|s| s.feature(rev, &path))
    }

    pub fn feature_exists(&self, rev: &str, path: &str) -> RepoResult<bool> {
        let path = NodePath::new(path)?;
        self.read(|s| {
            let tree = s.tree(s.resolve_tree(rev)?)?;
            Ok(tree.feature_id(&path)?.is_some())
        })
    }

    /// The feature type of the layer at `path` in `rev`.
    pub fn feature_type(&self, rev: &str, path: &str) -> RepoResult<FeatureType> {
        let path = NodePath::new(path)?;
        self.read(|s| {
            let tree = s.tree(s.resolve_tree(rev)?)?;
            Ok(tree.feature_type(s.repo, &path)?)
        })
    }

    /// Trees and features under `path` (the root when `None`).
    pub fn children(&self, rev: &str, path: Option<&str>, recursive: bool) -> RepoResult<Vec<Node>> {
        let path = optional_path(path)?;
        self.read(|s| {
            let tree = s.tree(s.resolve_tree(rev)?)?;
            Ok(tree.children(s.repo, path.as_ref(), recursive)?)
        })
    }

    /// Paths of the trees directly under `path`.
    pub fn trees(&self, rev: &str, path: Option<&str>) -> RepoResult<Vec<String>> {
        let path = optional_path(path)?;
        self.read(|s| {
            let tree = s.tree(s.resolve_tree(rev)?)?;
            Ok(tree.trees(s.repo, path.as_ref())?)
        })
    }

    /// Paths of the features directly under `path`.
    pub fn features(&self, rev: &str, path: Option<&str>) -> RepoResult<Vec<String>> {
        let path = optional_path(path)?;
        self.read(|s| {
            let tree = s.tree(s.resolve_tree(rev)?)?;
            Ok(tree.features(s.repo, path.as_ref())?)
        })
    }

    /// Number of features under `path`, nested trees included.
    pub fn count(&self, rev: &str, path: Option<&str>) -> RepoResult<usize> {
        let path = optional_path(path)?;
        self.read(|s| {
            let tree = s.tree(s.resolve_tree(rev)?)?;
            Ok(tree.count_features(s.repo, path.as_ref())?)
        })
    }

    /// Changed feature paths going from `old` to `new`, ordered by path.
    ///
    /// `filter` restricts the result to a path and everything below it.
    pub fn diff(&self, old: &str, new: &str, filter: Option<&str>) -> RepoResult<Vec<DiffEntry>> {
        self.read(|s| {
            let entries = s.diff(s.resolve_tree(old)?, s.resolve_tree(new)?, filter)?;
            Ok(entries.as_ref().clone())
        })
    }

    /// Attribute-level changes of one feature between two revisions.
    ///
    /// A feature missing on one side shows every attribute as added or removed.
    pub fn feature_diff(&self, old: &str, new: &str, path: &str) -> RepoResult<IndexMap<String, AttributeChange>> {
        let path = NodePath::new(path)?;
        self.read(|s| {
            let before = s.feature_at(old, &path)?;
            let after = s.feature_at(new, &path)?;
            if before.is_none() && after.is_none() {
                return Err(StorageError::FeatureNotFound(path.to_string()).into());
            }
            Ok(attribute_diff(before.as_ref(), after.as_ref()))
        })
    }

    /// Added, removed and modified counts per tree between two revisions.
    pub fn diff_tree_stats(&self, old: &str, new: &str) -> RepoResult<BTreeMap<String, TreeStats>> {
        self.read(|s| {
            let entries = s.diff(s.resolve_tree(old)?, s.resolve_tree(new)?, None)?;
            Ok(tree_stats(&entries))
        })
    }

    /// Changes in the working tree that are not staged.
    pub fn unstaged(&self) -> RepoResult<Vec<DiffEntry>> {
        self.diff(STAGE_HEAD, WORK_HEAD, None)
    }

    /// Changes staged for the next commit.
    pub fn staged(&self) -> RepoResult<Vec<DiffEntry>> {
        self.diff(HEAD, STAGE_HEAD, None)
    }

    /// Every change in the working tree relative to HEAD.
    pub fn not_in_database(&self) -> RepoResult<Vec<DiffEntry>> {
        self.diff(HEAD, WORK_HEAD, None)
    }

    /// Human-readable description of a commit, tree or feature.
    ///
    /// `rev` is either a commit expression or `rev:path`.
    pub fn show(&self, rev: &str) -> RepoResult<String> {
        self.read(|s| s.show(rev))
    }
}

impl Session<'_> {
    pub(crate) fn feature(&self, rev: &str, path: &NodePath) -> RepoResult<Feature> {
        self.feature_at(rev, path)?
            .ok_or_else(|| StorageError::FeatureNotFound(path.to_string()).into())
    }

    pub(crate) fn feature_at(&self, rev: &str, path: &NodePath) -> RepoResult<Option<Feature>> {
        let tree = self.tree(self.resolve_tree(rev)?)?;
        match tree.feature_id(path)? {
            Some(id) => Ok(Some(get_feature(self.repo, id)?)),
            None => Ok(None),
        }
    }

    fn show(&self, rev: &str) -> RepoResult<String> {
        let Some((rev, path)) = rev.split_once(':') else {
            let info = get_commit(self.repo, self.resolve(rev)?)?;
            return Ok(describe_commit(&info));
        };

        let tree = self.tree(self.resolve_tree(rev)?)?;
        if path.is_empty() {
            return self.describe_tree(&tree, None);
        }
        let path = NodePath::new(path)?;
        match tree.entry_at(&path)? {
            Some(Node::Tree { .. }) => self.describe_tree(&tree, Some(&path)),
            Some(Node::Feature { id, .. }) => {
                let feature = get_feature(self.repo, id)?;
                let mut out = String::new();
                let _ = writeln!(out, "ID: {}", id);
                let _ = writeln!(out, "PATH: {}", path);
                let _ = writeln!(out);
                let _ = writeln!(out, "ATTRIBUTES");
                let _ = writeln!(out, "----------");
                for (name, attr) in feature.iter() {
                    let _ = writeln!(out, "{}: {}", name, attr.value);
                }
                Ok(out)
            }
            None => Err(StorageError::FeatureNotFound(path.to_string()).into()),
        }
    }

    fn describe_tree(&self, root: &TreeHandle<'_>, path: Option<&NodePath>) -> RepoResult<String> {
        let tree = root
            .subtree(self.repo, path)?
            .ok_or_else(|| StorageError::TreeNotFound(path.map(|p| p.to_string()).unwrap_or_default()))?;
        let subtrees = tree.trees(self.repo, None)?.len();
        let size = tree.count_features(self.repo, None)?;

        let mut out = String::new();
        let _ = writeln!(out, "TREE ID: {}", tree.id());
        let _ = writeln!(out, "Size: {}", size);
        let _ = writeln!(out, "Number of subtrees: {}", subtrees);
        if let Some(path) = path {
            let feature_type = root.feature_type(self.repo, path)?;
            if !feature_type.is_empty() {
                let _ = writeln!(out, "DEFAULT FEATURE TYPE ATTRIBUTES");
                let _ = writeln!(out, "--------------------------------");
                for (name, attr_type) in feature_type.iter() {
                    let _ = writeln!(out, "{}: <{}>", name, attr_type);
                }
            }
        }
        Ok(out)
    }
}

fn describe_commit(info: &CommitInfo) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Commit:        {}", info.id);
    let _ = writeln!(out, "Author:        {} <{}>", info.author_name, info.author_email);
    let _ = writeln!(out, "Committer:     {} <{}>", info.committer_name, info.committer_email);
    let _ = writeln!(out, "Author date:   {}", info.author_time.to_rfc2822());
    let _ = writeln!(out, "Commit date:   {}", info.commit_time.to_rfc2822());
    let _ = writeln!(out, "Subject:       {}", info.summary());
    out
}
