//! tree operations for layer management.
//!
//! in Git, a tree is a directory. Here:
//! - the root tree of a snapshot holds layer trees
//! - a layer tree holds feature blobs, nested layer trees and an optional
//!   `.featuretype` blob describing its features
//! - a feature's path is the `/`-joined chain of tree names plus its own name
//!
//! this module provides safe abstractions over Git's tree manipulation,
//! which is notoriously fiddly to get right.

use std::collections::BTreeMap;
use std::path::Path;

use git2::{ErrorCode, FileMode, ObjectType, Oid, Repository, Tree, TreeBuilder};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::feature::{self, FeatureType};
use crate::storage::types::{join_path, FeatureId, FeatureTypeId, NodePath, TreeId};

/// name of the entry holding a layer's feature type
pub const FEATURE_TYPE_ENTRY: &str = ".featuretype";

/// entries starting with a dot carry metadata, not features
pub(crate) fn is_reserved(name: &str) -> bool {
    name.starts_with('.')
}

/// An entry inside a snapshot: either a tree or a feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Tree { path: String, id: TreeId },
    Feature { path: String, id: FeatureId },
}

impl Node {
    pub fn path(&self) -> &str {
        match self {
            Node::Tree { path, .. } | Node::Feature { path, .. } => path,
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Node::Tree { .. })
    }

    pub fn is_feature(&self) -> bool {
        matches!(self, Node::Feature { .. })
    }
}

/// A read only handle to a git tree
///
/// this provides safe, immutable access to a snapshot.
/// think of it as a frozen view - it won't change even if new commits are made.
#[derive(Debug, Clone)]
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    /// create a TreeHandle from a git2::Tree
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    /// look up a tree by id
    pub fn find(repo: &'repo Repository, id: TreeId) -> StorageResult<Self> {
        let tree = repo
            .find_tree(id.raw())
            .map_err(|_| StorageError::ObjectNotFound(id.to_string()))?;
        Ok(Self::new(tree))
    }

    /// get the tree ID
    pub fn id(&self) -> TreeId {
        TreeId::new(self.tree.id())
    }

    /// get the underlying git2::Tree (for internal use)
    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    /// resolve a path to the node stored there
    pub fn entry_at(&self, path: &NodePath) -> StorageResult<Option<Node>> {
        let entry = match self.tree.get_path(Path::new(path.as_str())) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let node = match entry.kind() {
            Some(ObjectType::Tree) => Node::Tree {
                path: path.to_string(),
                id: TreeId::new(entry.id()),
            },
            Some(ObjectType::Blob) => Node::Feature {
                path: path.to_string(),
                id: FeatureId::new(entry.id()),
            },
            other => {
                return Err(StorageError::UnexpectedEntryType {
                    path: path.to_string(),
                    expected: "tree or feature".to_string(),
                    found: format!("{:?}", other),
                })
            }
        };
        Ok(Some(node))
    }

    /// get the feature blob id at a path
    pub fn feature_id(&self, path: &NodePath) -> StorageResult<Option<FeatureId>> {
        match self.entry_at(path)? {
            Some(Node::Feature { id, .. }) => Ok(Some(id)),
            _ => Ok(None),
        }
    }

    /// get the subtree at a path (`None` means this tree)
    pub fn subtree(&self, repo: &'repo Repository, path: Option<&NodePath>) -> StorageResult<Option<TreeHandle<'repo>>> {
        let Some(path) = path else {
            return Ok(Some(self.clone()));
        };
        match self.entry_at(path)? {
            Some(Node::Tree { id, .. }) => Ok(Some(TreeHandle::new(repo.find_tree(id.raw())?))),
            _ => Ok(None),
        }
    }

    fn require_subtree(&self, repo: &'repo Repository, path: Option<&NodePath>) -> StorageResult<TreeHandle<'repo>> {
        self.subtree(repo, path)?.ok_or_else(|| {
            StorageError::TreeNotFound(path.map(|p| p.to_string()).unwrap_or_default())
        })
    }

    /// the id of the feature type blob of a layer, if it has one
    pub fn feature_type_id(&self, repo: &'repo Repository, path: Option<&NodePath>) -> StorageResult<Option<FeatureTypeId>> {
        let Some(layer) = self.subtree(repo, path)? else {
            return Ok(None);
        };
        let id = layer
            .tree
            .get_name(FEATURE_TYPE_ENTRY)
            .filter(|entry| entry.kind() == Some(ObjectType::Blob))
            .map(|entry| FeatureTypeId::new(entry.id()));
        Ok(id)
    }

    /// the feature type of a layer
    ///
    /// a layer without a type blob has an empty type
    pub fn feature_type(&self, repo: &'repo Repository, path: &NodePath) -> StorageResult<FeatureType> {
        let layer = self.require_subtree(repo, Some(path))?;
        match layer.feature_type_id(repo, None)? {
            Some(id) => feature::get_feature_type(repo, id),
            None => Ok(FeatureType::default()),
        }
    }

    /// list the nodes under a path
    pub fn children(&self, repo: &'repo Repository, path: Option<&NodePath>, recursive: bool) -> StorageResult<Vec<Node>> {
        let start = self.require_subtree(repo, path)?;
        let prefix = path.map(|p| p.to_string()).unwrap_or_default();
        let mut nodes = Vec::new();
        collect_children(repo, start.inner(), &prefix, recursive, &mut nodes)?;
        Ok(nodes)
    }

    /// paths of the trees directly under a path
    pub fn trees(&self, repo: &'repo Repository, path: Option<&NodePath>) -> StorageResult<Vec<String>> {
        let nodes = self.children(repo, path, false)?;
        Ok(nodes.into_iter().filter(Node::is_tree).map(|n| n.path().to_string()).collect())
    }

    /// paths of the features directly under a path
    pub fn features(&self, repo: &'repo Repository, path: Option<&NodePath>) -> StorageResult<Vec<String>> {
        let nodes = self.children(repo, path, false)?;
        Ok(nodes.into_iter().filter(Node::is_feature).map(|n| n.path().to_string()).collect())
    }

    /// number of features under a path, nested trees included
    pub fn count_features(&self, repo: &'repo Repository, path: Option<&NodePath>) -> StorageResult<usize> {
        let start = self.require_subtree(repo, path)?;
        count_features(repo, start.inner())
    }

    /// true if the snapshot holds nothing at all
    pub fn is_empty(&self) -> bool {
        self.tree.len() == 0
    }
}

fn collect_children(repo: &Repository, tree: &Tree<'_>, prefix: &str, recursive: bool, out: &mut Vec<Node>) -> StorageResult<()> {
    for entry in tree.iter() {
        let Some(name) = entry.name() else { continue };
        if is_reserved(name) {
            continue;
        }
        let path = join_path(prefix, name);
        match entry.kind() {
            Some(ObjectType::Tree) => {
                out.push(Node::Tree {
                    path: path.clone(),
                    id: TreeId::new(entry.id()),
                });
                if recursive {
                    let subtree = repo.find_tree(entry.id())?;
                    collect_children(repo, &subtree, &path, true, out)?;
                }
            }
            Some(ObjectType::Blob) => out.push(Node::Feature {
                path,
                id: FeatureId::new(entry.id()),
            }),
            _ => {}
        }
    }
    Ok(())
}

fn count_features(repo: &Repository, tree: &Tree<'_>) -> StorageResult<usize> {
    let mut count = 0;
    for entry in tree.iter() {
        if entry.name().map_or(true, is_reserved) {
            continue;
        }
        match entry.kind() {
            Some(ObjectType::Blob) => count += 1,
            Some(ObjectType::Tree) => count += count_features(repo, &repo.find_tree(entry.id())?)?,
            _ => {}
        }
    }
    Ok(count)
}

/// What happens to one entry when the mutator is written.
#[derive(Debug, Clone, Copy)]
enum Replace {
    Blob(Oid),
    Tree(Oid),
    Remove,
}

/// pending edits for a single tree entry
///
/// `replace` decides what the entry starts from; `children` are then
/// applied on top of it (only meaningful for trees).
#[derive(Debug, Default)]
struct Edit {
    replace: Option<Replace>,
    children: BTreeMap<String, Edit>,
}

/// A mutable builder for creating new snapshots.
///
/// Edits are collected in memory and applied in one pass on `write()`, so a
/// batch of many features rewrites each touched tree only once. Trees left
/// without any entry are pruned.
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    base: Option<Tree<'repo>>,
    edits: BTreeMap<String, Edit>,
}

impl<'repo> TreeMutator<'repo> {
    /// start from an existing tree
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'repo>) -> Self {
        Self {
            repo,
            base: Some(tree.inner().clone()),
            edits: BTreeMap::new(),
        }
    }

    /// start from a tree id
    pub fn from_id(repo: &'repo Repository, id: TreeId) -> StorageResult<Self> {
        let tree = TreeHandle::find(repo, id)?;
        Ok(Self::from_tree(repo, &tree))
    }

    /// start from an empty snapshot
    pub fn empty(repo: &'repo Repository) -> Self {
        Self {
            repo,
            base: None,
            edits: BTreeMap::new(),
        }
    }

    fn slot(&mut self, path: &str) -> &mut Edit {
        slot(&mut self.edits, path)
    }

    /// add or replace a feature
    pub fn put_feature(&mut self, path: &NodePath, id: FeatureId) {
        let slot = self.slot(path.as_str());
        slot.replace = Some(Replace::Blob(id.raw()));
        slot.children.clear();
    }

    /// add, replace or remove a feature in one call
    pub fn set_feature(&mut self, path: &NodePath, id: Option<FeatureId>) {
        match id {
            Some(id) => self.put_feature(path, id),
            None => self.remove(path),
        }
    }

    /// replace a whole subtree
    pub fn put_tree(&mut self, path: &NodePath, id: TreeId) {
        let slot = self.slot(path.as_str());
        slot.replace = Some(Replace::Tree(id.raw()));
        slot.children.clear();
    }

    /// set the feature type of a layer
    pub fn put_feature_type(&mut self, layer: &NodePath, id: FeatureTypeId) {
        let slot = self.slot(&join_path(layer.as_str(), FEATURE_TYPE_ENTRY));
        slot.replace = Some(Replace::Blob(id.raw()));
        slot.children.clear();
    }

    /// remove a feature or a whole tree; missing paths are ignored
    pub fn remove(&mut self, path: &NodePath) {
        let slot = self.slot(path.as_str());
        slot.replace = Some(Replace::Remove);
        slot.children.clear();
    }

    /// write the tree and all touched subtrees
    pub fn write(self) -> StorageResult<TreeId> {
        match write_level(self.repo, self.base, &self.edits)? {
            Some(oid) => Ok(TreeId::new(oid)),
            None => empty_tree(self.repo),
        }
    }
}

fn slot<'e>(edits: &'e mut BTreeMap<String, Edit>, path: &str) -> &'e mut Edit {
    match path.split_once('/') {
        None => edits.entry(path.to_string()).or_default(),
        Some((head, rest)) => {
            let parent = edits.entry(head.to_string()).or_default();
            // a feature being replaced by a tree
            if matches!(parent.replace, Some(Replace::Blob(_))) {
                parent.replace = Some(Replace::Remove);
            }
            slot(&mut parent.children, rest)
        }
    }
}

fn existing_subtree<'repo>(repo: &'repo Repository, builder: &TreeBuilder<'_>, name: &str) -> StorageResult<Option<Tree<'repo>>> {
    let oid = match builder.get(name)? {
        Some(entry) if entry.kind() == Some(ObjectType::Tree) => entry.id(),
        _ => return Ok(None),
    };
    Ok(Some(repo.find_tree(oid)?))
}

fn remove_if_present(builder: &mut TreeBuilder<'_>, name: &str) -> StorageResult<()> {
    if builder.get(name)?.is_some() {
        builder.remove(name)?;
    }
    Ok(())
}

/// apply edits on top of `base`; `None` means the result is empty
fn write_level(repo: &Repository, base: Option<Tree<'_>>, edits: &BTreeMap<String, Edit>) -> StorageResult<Option<Oid>> {
    let mut builder = repo.treebuilder(base.as_ref())?;

    for (name, edit) in edits {
        let child_base = match edit.replace {
            Some(Replace::Blob(oid)) => {
                builder.insert(name, oid, FileMode::Blob.into())?;
                continue;
            }
            Some(Replace::Remove) => None,
            Some(Replace::Tree(oid)) => Some(repo.find_tree(oid)?),
            None => existing_subtree(repo, &builder, name)?,
        };
        match write_level(repo, child_base, &edit.children)? {
            Some(oid) => {
                builder.insert(name, oid, FileMode::Tree.into())?;
            }
            None => remove_if_present(&mut builder, name)?,
        }
    }

    if builder.len() == 0 {
        return Ok(None);
    }
    Ok(Some(builder.write()?))
}

/// the id of the empty snapshot
pub fn empty_tree(repo: &Repository) -> StorageResult<TreeId> {
    let builder = repo.treebuilder(None)?;
    Ok(TreeId::new(builder.write()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::feature::{put_feature, put_feature_type, Feature};
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    fn path(p: &str) -> NodePath {
        NodePath::new(p).unwrap()
    }

    fn store(repo: &Repository, name: &str) -> FeatureId {
        put_feature(repo, &Feature::new().with("name", name)).unwrap()
    }

    #[test]
    fn test_empty_tree() {
        let (_dir, repo) = setup_repo();
        let id = TreeMutator::empty(&repo).write().unwrap();
        let tree = TreeHandle::find(&repo, id).unwrap();
        assert!(tree.is_empty());
        assert_eq!(id, empty_tree(&repo).unwrap());
    }

    #[test]
    fn test_put_and_lookup_nested() {
        let (_dir, repo) = setup_repo();
        let a = store(&repo, "a");
        let b = store(&repo, "b");

        let mut mutator = TreeMutator::empty(&repo);
        mutator.put_feature(&path("parks/1"), a);
        mutator.put_feature(&path("roads/main/1"), b);
        let id = mutator.write().unwrap();

        let tree = TreeHandle::find(&repo, id).unwrap();
        assert_eq!(tree.feature_id(&path("parks/1")).unwrap(), Some(a));
        assert_eq!(tree.feature_id(&path("roads/main/1")).unwrap(), Some(b));
        assert!(matches!(tree.entry_at(&path("roads/main")).unwrap(), Some(Node::Tree { .. })));
        assert_eq!(tree.entry_at(&path("parks/2")).unwrap(), None);

        assert_eq!(tree.trees(&repo, None).unwrap(), vec!["parks", "roads"]);
        assert_eq!(tree.features(&repo, Some(&path("parks"))).unwrap(), vec!["parks/1"]);
        assert_eq!(tree.count_features(&repo, None).unwrap(), 2);

        let all = tree.children(&repo, None, true).unwrap();
        let paths: Vec<_> = all.iter().map(Node::path).collect();
        assert_eq!(paths, vec!["parks", "parks/1", "roads", "roads/main", "roads/main/1"]);
    }

    #[test]
    fn test_remove_prunes_empty_trees() {
        let (_dir, repo) = setup_repo();
        let a = store(&repo, "a");

        let mut mutator = TreeMutator::empty(&repo);
        mutator.put_feature(&path("parks/1"), a);
        mutator.put_feature(&path("roads/1"), a);
        let id = mutator.write().unwrap();

        let mut mutator = TreeMutator::from_id(&repo, id).unwrap();
        mutator.remove(&path("parks/1"));
        mutator.remove(&path("missing/9"));
        let id = mutator.write().unwrap();

        let tree = TreeHandle::find(&repo, id).unwrap();
        assert_eq!(tree.trees(&repo, None).unwrap(), vec!["roads"]);
    }

    #[test]
    fn test_edits_are_content_addressed() {
        let (_dir, repo) = setup_repo();
        let a = store(&repo, "a");

        let mut first = TreeMutator::empty(&repo);
        first.put_feature(&path("parks/1"), a);
        let first = first.write().unwrap();

        let mut second = TreeMutator::empty(&repo);
        second.put_feature(&path("parks/2"), a);
        second.put_feature(&path("parks/1"), a);
        second.remove(&path("parks/2"));
        assert_eq!(second.write().unwrap(), first);
    }

    #[test]
    fn test_feature_type_entry_is_hidden() {
        let (_dir, repo) = setup_repo();
        let feature = Feature::new().with("name", "a").with("area", 2.5);
        let fid = put_feature(&repo, &feature).unwrap();
        let tid = put_feature_type(&repo, &feature.feature_type()).unwrap();

        let mut mutator = TreeMutator::empty(&repo);
        mutator.put_feature(&path("parks/1"), fid);
        mutator.put_feature_type(&path("parks"), tid);
        let id = mutator.write().unwrap();

        let tree = TreeHandle::find(&repo, id).unwrap();
        assert_eq!(tree.features(&repo, Some(&path("parks"))).unwrap(), vec!["parks/1"]);
        assert_eq!(tree.feature_type_id(&repo, Some(&path("parks"))).unwrap(), Some(tid));
        assert_eq!(tree.feature_type(&repo, &path("parks")).unwrap(), feature.feature_type());
        assert!(matches!(
            tree.feature_type(&repo, &path("roads")),
            Err(StorageError::TreeNotFound(_))
        ));
    }

    #[test]
    fn test_put_tree_copies_subtree() {
        let (_dir, repo) = setup_repo();
        let a = store(&repo, "a");

        let mut mutator = TreeMutator::empty(&repo);
        mutator.put_feature(&path("parks/1"), a);
        let source = TreeHandle::find(&repo, mutator.write().unwrap()).unwrap();
        let Some(Node::Tree { id: parks, .. }) = source.entry_at(&path("parks")).unwrap() else {
            panic!("parks should be a tree");
        };

        let mut mutator = TreeMutator::empty(&repo);
        mutator.put_tree(&path("copy"), parks);
        mutator.put_feature(&path("copy/2"), a);
        let tree = TreeHandle::find(&repo, mutator.write().unwrap()).unwrap();
        assert_eq!(tree.features(&repo, Some(&path("copy"))).unwrap(), vec!["copy/1", "copy/2"]);
    }
}
