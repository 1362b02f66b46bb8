//! Merge engine shared by merge, rebase and cherry-pick.

mod three_way;

pub use three_way::{merge_trees, ConflictPath, TreeMerge};

pub use crate::storage::{ConflictEntry, FeatureVersion};

/// Which side of a conflict to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Ours,
    Theirs,
}

/// How a single conflicted path gets resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Ours,
    Theirs,
    /// replace the feature with an explicit version
    Feature(crate::storage::Feature),
    /// remove the feature
    Delete,
}

impl From<Side> for Resolution {
    fn from(side: Side) -> Self {
        match side {
            Side::Ours => Resolution::Ours,
            Side::Theirs => Resolution::Theirs,
        }
    }
}
