//! Attribute-level blame.
//!
//! Walks the first-parent chain back from a commit and attributes every
//! attribute of a feature to the newest commit that changed its value.

use git2::Repository;
use indexmap::IndexMap;

use crate::storage::{
    get_commit, get_feature, get_tree_at_commit, CommitId, CommitInfo, Feature, FeatureId, NodePath, StorageError,
    StorageResult, Value,
};

/// Who last changed one attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct BlameEntry {
    /// current value of the attribute
    pub value: Value,
    pub commit: CommitId,
    pub author: String,
}

fn feature_id_at(repo: &Repository, commit: CommitId, path: &NodePath) -> StorageResult<Option<FeatureId>> {
    get_tree_at_commit(repo, commit)?.feature_id(path)
}

fn load(repo: &Repository, id: Option<FeatureId>) -> StorageResult<Option<Feature>> {
    id.map(|id| get_feature(repo, id)).transpose()
}

/// blame every attribute of the feature at `path` as seen from `start`
pub fn blame(repo: &Repository, start: CommitId, path: &NodePath) -> StorageResult<IndexMap<String, BlameEntry>> {
    let head_id = feature_id_at(repo, start, path)?.ok_or_else(|| StorageError::FeatureNotFound(path.to_string()))?;
    let head = get_feature(repo, head_id)?;

    let mut pending: Vec<String> = head.names().map(str::to_string).collect();
    let mut found: IndexMap<String, CommitInfo> = IndexMap::new();

    let mut current = get_commit(repo, start)?;
    let mut current_id = Some(head_id);
    let mut current_feature = Some(head.clone());

    while !pending.is_empty() {
        let parent = current.first_parent();
        let parent_id = match parent {
            Some(p) => feature_id_at(repo, p, path)?,
            None => None,
        };

        if parent_id != current_id {
            let parent_feature = load(repo, parent_id)?;
            pending.retain(|name| {
                let here = current_feature.as_ref().and_then(|f| f.get(name));
                let before = parent_feature.as_ref().and_then(|f| f.get(name));
                let unchanged = match (here, before) {
                    (Some(a), Some(b)) => a.equivalent(b),
                    (None, None) => true,
                    _ => false,
                };
                if !unchanged {
                    found.insert(name.clone(), current.clone());
                }
                unchanged
            });
            current_feature = parent_feature;
            current_id = parent_id;
        }

        match parent {
            Some(p) => current = get_commit(repo, p)?,
            None => break,
        }
    }

    let mut result = IndexMap::with_capacity(head.len());
    for (name, attr) in head.iter() {
        if let Some(commit) = found.get(name) {
            result.insert(
                name.to_string(),
                BlameEntry {
                    value: attr.value.clone(),
                    commit: commit.id,
                    author: commit.author_name.clone(),
                },
            );
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{put_feature, CommitBuilder, GitSignature, TreeId, TreeMutator};
    use tempfile::TempDir;

    fn commit_feature(repo: &Repository, parent: Option<CommitId>, feature: &Feature, author: &str) -> CommitId {
        let id = put_feature(repo, feature).unwrap();
        let mut mutator = TreeMutator::empty(repo);
        mutator.put_feature(&NodePath::new("parks/1").unwrap(), id);
        let tree: TreeId = mutator.write().unwrap();
        CommitBuilder::new(repo)
            .tree(tree)
            .parents(parent.into_iter().collect())
            .message(format!("by {}", author))
            .signature(GitSignature::new(author, "someone@example.com"))
            .commit()
            .unwrap()
    }

    #[test]
    fn test_blame_attributes() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();

        let v1 = Feature::new().with("name", "Central").with("area", 10.0).with("open", true);
        let c1 = commit_feature(&repo, None, &v1, "ann");

        let mut v2 = v1.clone();
        v2.set("area", 12.0);
        let c2 = commit_feature(&repo, Some(c1), &v2, "bob");

        // a commit that leaves the feature alone
        let c3 = commit_feature(&repo, Some(c2), &v2, "cid");

        let mut v4 = v2.clone();
        v4.set("open", false);
        let c4 = commit_feature(&repo, Some(c3), &v4, "dee");

        let blame = blame(&repo, c4, &NodePath::new("parks/1").unwrap()).unwrap();
        assert_eq!(blame.len(), 3);
        assert_eq!(blame["name"].commit, c1);
        assert_eq!(blame["name"].author, "ann");
        assert_eq!(blame["area"].commit, c2);
        assert_eq!(blame["area"].value, Value::Float(12.0));
        assert_eq!(blame["open"].commit, c4);
        assert_eq!(blame.keys().collect::<Vec<_>>(), vec!["name", "area", "open"]);
    }

    #[test]
    fn test_blame_missing_feature() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        let c1 = commit_feature(&repo, None, &Feature::new().with("name", "x"), "ann");

        let result = blame(&repo, c1, &NodePath::new("parks/2").unwrap());
        assert!(matches!(result, Err(StorageError::FeatureNotFound(_))));
    }
}
