//! Tree-to-tree and feature-to-feature comparison.
//!
//! Two snapshots are walked in lockstep by entry name. Subtrees with equal
//! ids are skipped without being read, which keeps diffs of large,
//! mostly-unchanged snapshots cheap. Feature type entries never show up as
//! changes, and neither do features whose attributes are all equivalent
//! (floats within tolerance) despite different blob ids.

use std::collections::{BTreeMap, BTreeSet};

use git2::{ObjectType, Oid, Repository};
use indexmap::IndexMap;

use crate::storage::{
    get_feature, is_reserved, is_within, join_path, ChangeType, Feature, FeatureId, StorageResult, TreeId, Value,
};

/// One changed feature path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub path: String,
    pub change: ChangeType,
    pub old: Option<FeatureId>,
    pub new: Option<FeatureId>,
}

impl DiffEntry {
    /// the same change seen in the opposite direction
    pub fn inverse(&self) -> Self {
        Self {
            path: self.path.clone(),
            change: self.change.inverse(),
            old: self.new,
            new: self.old,
        }
    }

    /// the tree holding the changed feature (empty for top-level entries)
    pub fn parent_path(&self) -> &str {
        self.path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
    }
}

/// Old and new value of one attribute.
///
/// `None` means the attribute is absent on that side.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Per-tree change counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

#[derive(Clone, Copy)]
enum EntryKind {
    Tree(Oid),
    Feature(Oid),
}

fn entries(repo: &Repository, tree: Option<Oid>) -> StorageResult<BTreeMap<String, EntryKind>> {
    let mut map = BTreeMap::new();
    let Some(oid) = tree else {
        return Ok(map);
    };
    let tree = repo.find_tree(oid)?;
    for entry in tree.iter() {
        let Some(name) = entry.name() else { continue };
        if is_reserved(name) {
            continue;
        }
        let kind = match entry.kind() {
            Some(ObjectType::Tree) => EntryKind::Tree(entry.id()),
            Some(ObjectType::Blob) => EntryKind::Feature(entry.id()),
            _ => continue,
        };
        map.insert(name.to_string(), kind);
    }
    Ok(map)
}

/// does `path` need to be visited for the given filter
fn relevant(path: &str, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(f) => is_within(path, f) || is_within(f, path),
    }
}

fn matches_filter(path: &str, filter: Option<&str>) -> bool {
    filter.map_or(true, |f| is_within(path, f))
}

struct Walker<'a> {
    repo: &'a Repository,
    filter: Option<&'a str>,
    out: Vec<DiffEntry>,
}

impl Walker<'_> {
    fn emit(&mut self, path: String, change: ChangeType, old: Option<Oid>, new: Option<Oid>) {
        if matches_filter(&path, self.filter) {
            self.out.push(DiffEntry {
                path,
                change,
                old: old.map(FeatureId::new),
                new: new.map(FeatureId::new),
            });
        }
    }

    fn equivalent(&self, a: Oid, b: Oid) -> StorageResult<bool> {
        let old = get_feature(self.repo, FeatureId::new(a))?;
        let new = get_feature(self.repo, FeatureId::new(b))?;
        Ok(attribute_diff(Some(&old), Some(&new)).is_empty())
    }

    fn walk(&mut self, prefix: &str, old: Option<Oid>, new: Option<Oid>) -> StorageResult<()> {
        if old == new {
            return Ok(());
        }
        let old_entries = entries(self.repo, old)?;
        let new_entries = entries(self.repo, new)?;
        let names: BTreeSet<&String> = old_entries.keys().chain(new_entries.keys()).collect();

        for name in names {
            let path = join_path(prefix, name);
            if !relevant(&path, self.filter) {
                continue;
            }
            match (old_entries.get(name).copied(), new_entries.get(name).copied()) {
                (None, Some(EntryKind::Feature(b))) => self.emit(path, ChangeType::Added, None, Some(b)),
                (Some(EntryKind::Feature(a)), None) => self.emit(path, ChangeType::Removed, Some(a), None),
                (Some(EntryKind::Feature(a)), Some(EntryKind::Feature(b))) => {
                    if a != b && matches_filter(&path, self.filter) && !self.equivalent(a, b)? {
                        self.emit(path, ChangeType::Modified, Some(a), Some(b));
                    }
                }
                (None, Some(EntryKind::Tree(b))) => self.walk(&path, None, Some(b))?,
                (Some(EntryKind::Tree(a)), None) => self.walk(&path, Some(a), None)?,
                (Some(EntryKind::Tree(a)), Some(EntryKind::Tree(b))) => self.walk(&path, Some(a), Some(b))?,
                // a feature replaced by a tree or the other way round
                (Some(EntryKind::Feature(a)), Some(EntryKind::Tree(b))) => {
                    self.emit(path.clone(), ChangeType::Removed, Some(a), None);
                    self.walk(&path, None, Some(b))?;
                }
                (Some(EntryKind::Tree(a)), Some(EntryKind::Feature(b))) => {
                    self.walk(&path, Some(a), None)?;
                    self.emit(path, ChangeType::Added, None, Some(b));
                }
                (None, None) => {}
            }
        }
        Ok(())
    }
}

/// all feature paths that differ between two snapshots, ordered by path
///
/// with a filter only paths equal to or below it are reported.
pub fn diff_trees(repo: &Repository, old: TreeId, new: TreeId, filter: Option<&str>) -> StorageResult<Vec<DiffEntry>> {
    let mut walker = Walker {
        repo,
        filter,
        out: Vec::new(),
    };
    walker.walk("", Some(old.raw()), Some(new.raw()))?;
    Ok(walker.out)
}

/// per-attribute differences between two versions of a feature
///
/// attributes are listed in the old feature's order, followed by the ones
/// only the new feature has. Equivalent values are left out.
pub fn attribute_diff(old: Option<&Feature>, new: Option<&Feature>) -> IndexMap<String, AttributeChange> {
    let mut names: IndexMap<&str, ()> = IndexMap::new();
    for feature in [old, new].into_iter().flatten() {
        for name in feature.names() {
            names.insert(name, ());
        }
    }

    let mut changes = IndexMap::new();
    for name in names.keys() {
        let a = old.and_then(|f| f.get(name));
        let b = new.and_then(|f| f.get(name));
        let same = match (a, b) {
            (Some(a), Some(b)) => a.equivalent(b),
            (None, None) => true,
            _ => false,
        };
        if !same {
            changes.insert(
                name.to_string(),
                AttributeChange {
                    old: a.cloned(),
                    new: b.cloned(),
                },
            );
        }
    }
    changes
}

/// group diff entries by the tree they live in
pub fn tree_stats(entries: &[DiffEntry]) -> BTreeMap<String, TreeStats> {
    let mut stats: BTreeMap<String, TreeStats> = BTreeMap::new();
    for entry in entries {
        let slot = stats.entry(entry.parent_path().to_string()).or_default();
        match entry.change {
            ChangeType::Added => slot.added += 1,
            ChangeType::Removed => slot.removed += 1,
            ChangeType::Modified => slot.modified += 1,
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{put_feature, put_feature_type, NodePath, TreeMutator};
    use tempfile::TempDir;

    fn setup_repo() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init_bare(dir.path()).unwrap();
        (dir, repo)
    }

    fn park(name: &str, area: f64) -> Feature {
        Feature::new().with("name", name).with("area", area)
    }

    fn snapshot(repo: &Repository, features: &[(&str, Feature)]) -> TreeId {
        let mut mutator = TreeMutator::empty(repo);
        for (path, feature) in features {
            let id = put_feature(repo, feature).unwrap();
            mutator.put_feature(&NodePath::new(*path).unwrap(), id);
        }
        mutator.write().unwrap()
    }

    #[test]
    fn test_identical_trees() {
        let (_dir, repo) = setup_repo();
        let a = snapshot(&repo, &[("parks/1", park("a", 1.0))]);
        assert!(diff_trees(&repo, a, a, None).unwrap().is_empty());
    }

    #[test]
    fn test_added_removed_modified() {
        let (_dir, repo) = setup_repo();
        let old = snapshot(
            &repo,
            &[("parks/1", park("a", 1.0)), ("parks/2", park("b", 2.0)), ("roads/1", park("r", 0.0))],
        );
        let new = snapshot(
            &repo,
            &[("parks/1", park("a", 1.5)), ("parks/3", park("c", 3.0)), ("roads/1", park("r", 0.0))],
        );

        let entries = diff_trees(&repo, old, new, None).unwrap();
        let summary: Vec<_> = entries.iter().map(|e| (e.path.as_str(), e.change)).collect();
        assert_eq!(
            summary,
            vec![
                ("parks/1", ChangeType::Modified),
                ("parks/2", ChangeType::Removed),
                ("parks/3", ChangeType::Added),
            ]
        );
        assert!(entries[1].new.is_none());
        assert!(entries[2].old.is_none());

        // reversing the direction swaps adds and removes
        let reverse = diff_trees(&repo, new, old, None).unwrap();
        let inverted: Vec<_> = entries.iter().map(DiffEntry::inverse).collect();
        assert_eq!(reverse, inverted);
    }

    #[test]
    fn test_float_noise_is_not_a_modification() {
        let (_dir, repo) = setup_repo();
        let old = snapshot(&repo, &[("parks/1", park("a", 100.0)), ("parks/2", park("b", 2.0))]);
        let new = snapshot(&repo, &[("parks/1", park("a", 100.0 + 1e-10)), ("parks/2", park("b", 2.5))]);
        assert_ne!(old, new);

        let entries = diff_trees(&repo, old, new, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "parks/2");
    }

    #[test]
    fn test_path_filter() {
        let (_dir, repo) = setup_repo();
        let old = snapshot(&repo, &[("parks/1", park("a", 1.0))]);
        let new = snapshot(&repo, &[("parks/1", park("a", 2.0)), ("parks/10", park("x", 1.0)), ("roads/1", park("r", 1.0))]);

        let only_one = diff_trees(&repo, old, new, Some("parks/1")).unwrap();
        assert_eq!(only_one.len(), 1);
        assert_eq!(only_one[0].path, "parks/1");

        let parks = diff_trees(&repo, old, new, Some("parks")).unwrap();
        assert_eq!(parks.len(), 2);
    }

    #[test]
    fn test_feature_type_is_ignored() {
        let (_dir, repo) = setup_repo();
        let feature = park("a", 1.0);
        let fid = put_feature(&repo, &feature).unwrap();
        let tid = put_feature_type(&repo, &feature.feature_type()).unwrap();
        let path = NodePath::new("parks/1").unwrap();

        let mut plain = TreeMutator::empty(&repo);
        plain.put_feature(&path, fid);
        let plain = plain.write().unwrap();

        let mut typed = TreeMutator::from_id(&repo, plain).unwrap();
        typed.put_feature_type(&NodePath::new("parks").unwrap(), tid);
        let typed = typed.write().unwrap();

        assert_ne!(plain, typed);
        assert!(diff_trees(&repo, plain, typed, None).unwrap().is_empty());
    }

    #[test]
    fn test_attribute_diff() {
        let old = park("a", 1.0).with("keeper", "Ann");
        let new = park("a", 1.0 + 1e-12).with("visits", 3i64);

        let changes = attribute_diff(Some(&old), Some(&new));
        let names: Vec<_> = changes.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["keeper", "visits"]);
        assert_eq!(changes["keeper"].new, None);
        assert_eq!(changes["visits"].old, None);

        let added = attribute_diff(None, Some(&old));
        assert_eq!(added.len(), 3);
        assert!(added.values().all(|c| c.old.is_none()));
    }

    #[test]
    fn test_tree_stats() {
        let (_dir, repo) = setup_repo();
        let old = snapshot(&repo, &[("parks/1", park("a", 1.0)), ("parks/2", park("b", 1.0))]);
        let new = snapshot(&repo, &[("parks/1", park("a", 9.0)), ("parks/3", park("c", 1.0)), ("roads/1", park("r", 1.0))]);

        let stats = tree_stats(&diff_trees(&repo, old, new, None).unwrap());
        assert_eq!(stats["parks"], TreeStats { added: 1, removed: 1, modified: 1 });
        assert_eq!(stats["roads"], TreeStats { added: 1, removed: 0, modified: 0 });
    }
}
