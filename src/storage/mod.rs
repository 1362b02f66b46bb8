//! storage layer
//!
//! this module is the complete abstraction over git for the object store.
//! The engines above it (diff, merge, blame) and the repository facade use
//! this API and only see git2 types through it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GitRepository                           │
//! │           (locked access to the bare object store)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │   feature   │       │    refs     │
//!  │  (layers)   │       │   (blobs)   │       │ (branches)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         │                     │                     │
//!         └─────────────────────┼─────────────────────┘
//!                               │
//!                ┌──────────────┴──────────────┐
//!                ▼                             ▼
//!         ┌─────────────┐               ┌─────────────┐
//!         │   commit    │               │    state    │
//!         │  (history)  │               │ (workspace) │
//!         └─────────────┘               └─────────────┘
//! ```

mod commit;
mod error;
mod feature;
mod refs;
mod repository;
mod state;
mod tree;
mod types;

// Re-export public API
pub use commit::{
    commits_to_replay, find_merge_base, get_commit, get_tree_at_commit, history, is_ancestor, CommitBuilder,
    CommitInfo, CommitMessage, HistoryIterator,
};
pub use error::{StorageError, StorageResult};
pub use feature::{
    get_feature, get_feature_type, put_feature, put_feature_type, Attribute, AttributeType, Feature, FeatureType,
    Geometry, Value,
};
pub use refs::{HeadState, RefManager, TagInfo};
pub use repository::{GitRepository, GEOGIG_DIR};
pub use state::{ConflictEntry, FeatureVersion, Operation, RebaseState, RepositoryState};
pub use tree::{empty_tree, Node, TreeHandle, TreeMutator, FEATURE_TYPE_ENTRY};
pub use types::{
    BranchName, ChangeType, CommitId, FeatureId, FeatureTypeId, GitSignature, InvalidNameError, NodePath,
    ResetMode, TagName, TreeId,
};

pub(crate) use tree::is_reserved;
pub(crate) use types::{is_within, join_path};
