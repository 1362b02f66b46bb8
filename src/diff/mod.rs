//! Diff engine: what changed between two snapshots, per path and per
//! attribute.

mod cache;
mod engine;

pub use cache::DiffCache;
pub use engine::{attribute_diff, diff_trees, tree_stats, AttributeChange, DiffEntry, TreeStats};
